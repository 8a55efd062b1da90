use std::sync::Arc;
use std::time::Duration;

use mission_protocol::control::SyncStatus;
use mission_protocol::CommandEnvelope;
use record_store::{ExpectedPrevious, RecordStore, StoreError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::ConsoleEvent;
use crate::mission::MissionControl;

use super::baseline::fetch_baseline;
use super::{SendQueue, SyncHandle, SyncLink, SyncRequest, SyncState};

#[derive(Debug, Clone)]
pub(crate) struct SyncSettings {
    pub(crate) command_log_target: String,
    pub(crate) station_target: String,
    pub(crate) silent_resync_interval: Duration,
}

enum Wake {
    Shutdown,
    Request(SyncRequest),
    ResyncDue,
}

/// Single task that owns all command-log traffic for this client.
pub(crate) struct SyncEngine {
    store: Arc<dyn RecordStore>,
    mission: Arc<MissionControl>,
    settings: SyncSettings,
    requests: mpsc::UnboundedReceiver<SyncRequest>,
    state: watch::Sender<SyncState>,
    queue: SendQueue,
    view: SyncHandle,
    event_tx: broadcast::Sender<ConsoleEvent>,
    last_ack_ms: Option<u64>,
}

impl SyncEngine {
    pub(crate) fn new(
        store: Arc<dyn RecordStore>,
        mission: Arc<MissionControl>,
        view: SyncHandle,
        link: SyncLink,
        settings: SyncSettings,
    ) -> Self {
        let event_tx = mission.events();
        Self {
            store,
            mission,
            settings,
            requests: link.requests,
            state: link.state,
            queue: link.queue,
            view,
            event_tx,
            last_ack_ms: None,
        }
    }

    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        info!(
            event = "sync.start",
            target = %self.settings.command_log_target,
            silent_resync = %humantime::format_duration(self.settings.silent_resync_interval),
            "sync engine started"
        );
        self.blocking_sync().await;
        loop {
            match self.status() {
                SyncStatus::Halted => {
                    shutdown.cancelled().await;
                    break;
                }
                SyncStatus::SyncError => match self.wait(&shutdown, None).await {
                    Wake::Shutdown => break,
                    Wake::Request(SyncRequest::RetryBlockingSync) => self.blocking_sync().await,
                    Wake::Request(request) => {
                        debug!(
                            event = "sync.request.ignored",
                            request = ?request,
                            "sync error pending retry"
                        );
                    }
                    Wake::ResyncDue => {}
                },
                _ if !self.queue.is_empty() => self.drain().await,
                _ => {
                    let interval = self.settings.silent_resync_interval;
                    match self.wait(&shutdown, Some(interval)).await {
                        Wake::Shutdown => break,
                        Wake::Request(SyncRequest::Flush) => {}
                        Wake::Request(SyncRequest::Resync) | Wake::ResyncDue => {
                            self.silent_sync().await
                        }
                        Wake::Request(SyncRequest::RetryBlockingSync) => {
                            debug!(
                                event = "sync.request.ignored",
                                request = "retry_blocking_sync",
                                "no sync error to retry"
                            );
                        }
                    }
                }
            }
        }
        info!(event = "sync.stop", "sync engine stopped");
    }

    async fn wait(&mut self, shutdown: &CancellationToken, resync: Option<Duration>) -> Wake {
        let resync_due = async {
            match resync {
                Some(interval) => tokio::time::sleep(interval).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = shutdown.cancelled() => Wake::Shutdown,
            request = self.requests.recv() => match request {
                Some(request) => Wake::Request(request),
                None => Wake::Shutdown,
            },
            _ = resync_due => Wake::ResyncDue,
        }
    }

    /// Clears local pending work and rebuilds state from the full command log.
    async fn blocking_sync(&mut self) {
        self.last_ack_ms = None;
        self.set_state(SyncStatus::BlockedUntilSynced, None);
        let cleared = self.queue.clear();
        if cleared > 0 {
            warn!(
                event = "sync.queue.cleared",
                cleared,
                "discarding unacknowledged commands before blocking sync"
            );
        }
        if self.reconcile().await {
            self.set_state(SyncStatus::Idle, None);
        }
    }

    async fn silent_sync(&mut self) {
        self.set_state(SyncStatus::SilentlySyncing, None);
        if self.reconcile().await {
            self.set_state(SyncStatus::Idle, None);
        }
    }

    /// Fetches, validates and hands the baseline to the mission owner.
    /// Returns false when the engine left the syncing path.
    async fn reconcile(&mut self) -> bool {
        let baseline =
            match fetch_baseline(self.store.as_ref(), &self.settings.command_log_target).await {
                Ok(baseline) => baseline,
                Err(err) => {
                    self.fail("baseline fetch", &err);
                    return false;
                }
            };
        match baseline.replay() {
            Ok(authoritative) => {
                self.last_ack_ms = baseline.last_received_ms;
                let diverged = self.mission.apply_baseline(&baseline, authoritative);
                info!(
                    event = "sync.baseline.loaded",
                    commands = baseline.entries.len(),
                    dropped = baseline.dropped,
                    last_received_ms = ?baseline.last_received_ms,
                    diverged,
                    "baseline validated"
                );
                true
            }
            Err(err) => {
                warn!(
                    event = "sync.baseline.rejected",
                    number = err.number,
                    command = err.kind,
                    "command log replay failed"
                );
                self.mission.report_inconsistent_baseline(err.to_string());
                self.set_state(SyncStatus::Halted, Some(err.to_string()));
                false
            }
        }
    }

    /// Appends queued commands one at a time, in order.
    async fn drain(&mut self) {
        while let Some(head) = self.queue.front() {
            self.set_state(SyncStatus::Sending, None);
            let receipt = match self.append(&head).await {
                Ok(receipt) => receipt,
                Err(err) => {
                    self.fail("append", &err);
                    return;
                }
            };
            self.queue.pop_front();
            self.last_ack_ms = Some(receipt);
            debug!(
                event = "sync.append.acked",
                command = head.command.kind(),
                received_at_ms = receipt,
                remaining = self.queue.len(),
                "command acknowledged"
            );
            if let Err(err) = self.forward_to_devices(&head).await {
                self.fail("device forward", &err);
                return;
            }
        }
        self.set_state(SyncStatus::Idle, None);
    }

    async fn append(&self, envelope: &CommandEnvelope) -> Result<u64, StoreError> {
        let data =
            serde_json::to_value(envelope).map_err(|err| StoreError::Decode(err.to_string()))?;
        let receipt = self
            .store
            .create_message(
                &self.settings.command_log_target,
                data,
                Some(ExpectedPrevious::from_last(self.last_ack_ms)),
            )
            .await?;
        Ok(receipt.received_at_ms)
    }

    async fn forward_to_devices(&self, envelope: &CommandEnvelope) -> Result<(), StoreError> {
        for (target, data) in envelope
            .command
            .device_messages(&self.settings.station_target)
        {
            self.store.create_message(&target, data, None).await?;
            info!(
                event = "sync.device.forwarded",
                target = %target,
                command = envelope.command.kind(),
                "device message forwarded"
            );
        }
        Ok(())
    }

    fn fail(&self, stage: &str, err: &StoreError) {
        warn!(
            event = "sync.failed",
            stage,
            error = %err,
            pending = self.queue.len(),
            "sync error; waiting for retry"
        );
        self.set_state(SyncStatus::SyncError, Some(format!("{stage}: {err}")));
    }

    fn status(&self) -> SyncStatus {
        self.state.borrow().status
    }

    fn set_state(&self, status: SyncStatus, last_error: Option<String>) {
        let next = SyncState {
            status,
            last_ack_ms: self.last_ack_ms,
            last_error,
        };
        let previous = self.state.send_replace(next);
        if previous.status != status {
            info!(
                event = "sync.status",
                from = previous.status.as_str(),
                to = status.as_str(),
                "sync status changed"
            );
        }
        let _ = self.event_tx.send(ConsoleEvent::SyncUpdated {
            sync: self.view.view(),
        });
    }
}
