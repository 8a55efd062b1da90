mod api;
mod cli;
mod config;
mod events;
mod logging;
mod mission;
mod simulator;
mod sync;
mod telemetry;

use crate::api::AppState;
use crate::cli::Args;
use crate::config::{load_console_config, ConsoleConfig};
use crate::events::ConsoleEvent;
use crate::logging::init_logging;
use crate::mission::MissionControl;
use crate::simulator::StationSimulator;
use crate::sync::{SyncEngine, SyncSettings};
use crate::telemetry::{spawn_pollers, PollSettings, Telemetry};
use anyhow::Context;
use clap::Parser;
use launch_machine::Snapshot;
use record_store::{HttpStore, MemoryStore, RecordStore, StoreScope};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args.log_dir, args.log_to_stderr)
        .with_context(|| format!("failed to init logging in {}", args.log_dir.display()))?;

    info!(
        listen_addr = %args.listen_addr,
        config = %args.config.display(),
        dry_run = args.dry_run,
        "ground console starting"
    );
    let config = load_console_config(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    let store = open_store(&config, args.dry_run).await?;
    let client_id = config.resolve_client_id();
    info!(
        station_id = %store.scope().station_id,
        session_id = ?store.scope().session_id,
        client_id = %client_id,
        "relay session ready"
    );

    let shutdown = CancellationToken::new();
    let (event_tx, _) = broadcast::channel::<ConsoleEvent>(512);
    let (sync_handle, sync_link) = sync::channel();
    let mission = Arc::new(MissionControl::new(
        client_id,
        sync_handle.clone(),
        event_tx.clone(),
    ));
    let engine = SyncEngine::new(
        Arc::clone(&store),
        Arc::clone(&mission),
        sync_handle.clone(),
        sync_link,
        SyncSettings {
            command_log_target: config.command_log_target.clone(),
            station_target: config.station_target.clone(),
            silent_resync_interval: config.silent_resync_interval(),
        },
    );
    let mut tasks = vec![tokio::spawn(engine.run(shutdown.clone()))];

    let telemetry = Telemetry::new(config.telemetry.buffer_capacity);
    tasks.extend(spawn_pollers(
        Arc::clone(&store),
        telemetry.clone(),
        config.telemetry.sources.clone(),
        PollSettings {
            interval: config.poll_interval(),
            take: config.telemetry.take,
        },
        event_tx.clone(),
        shutdown.clone(),
    ));

    tasks.push(tokio::spawn(log_panel_changes(
        mission.subscribe(),
        shutdown.clone(),
    )));

    if args.dry_run {
        let simulator = StationSimulator::new(
            Arc::clone(&store),
            config.station_target.clone(),
            config.poll_interval(),
        );
        tasks.push(tokio::spawn(simulator.run(shutdown.clone())));
    }

    let app = api::router(AppState {
        mission: Arc::clone(&mission),
        sync: sync_handle,
        telemetry,
        event_tx,
    });
    let listener = TcpListener::bind(&args.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", args.listen_addr))?;
    info!(addr = %args.listen_addr, client_id = %mission.client_id(), "ground console listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown.clone()))
        .await?;
    info!("ground console shutting down");
    shutdown.cancel();
    for task in tasks {
        if let Err(err) = task.await {
            tracing::warn!(error = %err, "background task ended abnormally");
        }
    }
    Ok(())
}

/// Opens the relay store, creating a session when none is configured.
async fn open_store(config: &ConsoleConfig, dry_run: bool) -> anyhow::Result<Arc<dyn RecordStore>> {
    let scope = StoreScope::new(config.station_id.clone(), config.session_id.clone());
    if dry_run {
        let memory = MemoryStore::new(scope);
        if config.session_id.is_some() {
            return Ok(Arc::new(memory));
        }
        let session = memory
            .create_session(&config.session_name)
            .await
            .context("failed to create dry-run session")?;
        return Ok(Arc::new(memory.with_session(session.id)));
    }

    let relay = config
        .relay
        .as_ref()
        .context("relay.base_url is required unless --dry-run is set")?;
    let store = HttpStore::new(&relay.base_url, scope.clone())
        .with_context(|| format!("invalid relay url {}", relay.base_url))?;
    if config.session_id.is_some() {
        return Ok(Arc::new(store));
    }
    let session = store
        .create_session(&config.session_name)
        .await
        .with_context(|| format!("failed to create session {}", config.session_name))?;
    info!(
        event = "relay.session.created",
        session_id = %session.id,
        name = %session.name,
        "relay session created"
    );
    let store = HttpStore::new(&relay.base_url, scope.with_session(session.id))
        .with_context(|| format!("invalid relay url {}", relay.base_url))?;
    Ok(Arc::new(store))
}

async fn log_panel_changes(mut snapshots: watch::Receiver<Snapshot>, shutdown: CancellationToken) {
    let mut panel = snapshots.borrow().active_panel();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = snapshots.borrow_and_update().active_panel();
                if next != panel {
                    info!(
                        event = "mission.panel",
                        from = ?panel,
                        to = ?next,
                        "active panel changed"
                    );
                    panel = next;
                }
            }
        }
    }
}

async fn wait_for_shutdown(shutdown: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}
