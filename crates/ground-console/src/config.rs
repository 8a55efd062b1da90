use anyhow::Context;
use mission_protocol::station::{
    FIRING_STATION_SOURCE, GPS_SOURCE, LOAD_CELL_SOURCE, THERMOCOUPLE_SOURCE,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

const DEFAULT_COMMAND_LOG_TARGET: &str = "mission_commands";
const DEFAULT_SESSION_NAME: &str = "ground-console";
const DEFAULT_SILENT_RESYNC_MS: u64 = 5_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_BUFFER_CAPACITY: usize = 600;
const DEFAULT_TAKE: usize = 100;

#[derive(Debug, Deserialize)]
pub(crate) struct ConsoleConfig {
    pub(crate) station_id: String,
    pub(crate) session_id: Option<String>,
    #[serde(default = "default_session_name")]
    pub(crate) session_name: String,
    pub(crate) client_id: Option<String>,
    #[serde(default = "default_command_log_target")]
    pub(crate) command_log_target: String,
    #[serde(default = "default_station_target")]
    pub(crate) station_target: String,
    pub(crate) relay: Option<RelayConfig>,
    #[serde(default)]
    pub(crate) sync: SyncConfig,
    #[serde(default)]
    pub(crate) telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RelayConfig {
    pub(crate) base_url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SyncConfig {
    #[serde(default = "default_silent_resync_ms")]
    pub(crate) silent_resync_interval_ms: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TelemetryConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub(crate) poll_interval_ms: u64,
    #[serde(default = "default_buffer_capacity")]
    pub(crate) buffer_capacity: usize,
    #[serde(default = "default_take")]
    pub(crate) take: usize,
    #[serde(default = "default_sources")]
    pub(crate) sources: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            silent_resync_interval_ms: DEFAULT_SILENT_RESYNC_MS,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            take: DEFAULT_TAKE,
            sources: default_sources(),
        }
    }
}

impl ConsoleConfig {
    pub(crate) fn silent_resync_interval(&self) -> Duration {
        Duration::from_millis(self.sync.silent_resync_interval_ms)
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry.poll_interval_ms)
    }

    /// Configured client id, or a fresh one for this process.
    pub(crate) fn resolve_client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("console-{}", uuid::Uuid::new_v4()))
    }
}

pub(crate) fn load_console_config(path: &Path) -> anyhow::Result<ConsoleConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: ConsoleConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ConsoleConfig) -> anyhow::Result<()> {
    if config.station_id.trim().is_empty() {
        anyhow::bail!("station_id cannot be empty");
    }
    if config.command_log_target.trim().is_empty() || config.station_target.trim().is_empty() {
        anyhow::bail!("command_log_target and station_target cannot be empty");
    }
    if config.command_log_target == config.station_target {
        anyhow::bail!(
            "command_log_target and station_target must differ (both {})",
            config.station_target
        );
    }
    if config
        .session_id
        .as_ref()
        .is_some_and(|id| id.trim().is_empty())
    {
        anyhow::bail!("session_id cannot be empty when set");
    }
    if config.sync.silent_resync_interval_ms == 0 {
        anyhow::bail!("sync.silent_resync_interval_ms must be positive");
    }
    if config.telemetry.poll_interval_ms == 0 {
        anyhow::bail!("telemetry.poll_interval_ms must be positive");
    }
    if config.telemetry.buffer_capacity == 0 || config.telemetry.take == 0 {
        anyhow::bail!("telemetry.buffer_capacity and telemetry.take must be positive");
    }
    let mut seen = HashSet::new();
    for source in &config.telemetry.sources {
        if !seen.insert(source.as_str()) {
            anyhow::bail!("duplicate telemetry source: {}", source);
        }
    }
    Ok(())
}

fn default_session_name() -> String {
    DEFAULT_SESSION_NAME.to_string()
}

fn default_command_log_target() -> String {
    DEFAULT_COMMAND_LOG_TARGET.to_string()
}

fn default_station_target() -> String {
    FIRING_STATION_SOURCE.to_string()
}

fn default_silent_resync_ms() -> u64 {
    DEFAULT_SILENT_RESYNC_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_take() -> usize {
    DEFAULT_TAKE
}

fn default_sources() -> Vec<String> {
    [
        FIRING_STATION_SOURCE,
        GPS_SOURCE,
        LOAD_CELL_SOURCE,
        THERMOCOUPLE_SOURCE,
    ]
    .iter()
    .map(|source| source.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> anyhow::Result<ConsoleConfig> {
        let config: ConsoleConfig = toml::from_str(raw)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(r#"station_id = "pad-a""#).expect("config");
        assert_eq!(config.command_log_target, "mission_commands");
        assert_eq!(config.station_target, "firing_station");
        assert_eq!(config.silent_resync_interval(), Duration::from_millis(5_000));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.telemetry.sources.len(), 4);
        assert!(config.relay.is_none());
        assert!(config.resolve_client_id().starts_with("console-"));
    }

    #[test]
    fn full_config_round_trips_sections() {
        let config = parse(
            r#"
station_id = "pad-b"
session_id = "hotfire-03"
client_id = "console-1"

[relay]
base_url = "http://relay.local:8080"

[sync]
silent_resync_interval_ms = 2500

[telemetry]
poll_interval_ms = 250
buffer_capacity = 10
take = 5
sources = ["gps"]
"#,
        )
        .expect("config");
        assert_eq!(config.session_id.as_deref(), Some("hotfire-03"));
        assert_eq!(config.resolve_client_id(), "console-1");
        assert_eq!(
            config.relay.as_ref().map(|relay| relay.base_url.as_str()),
            Some("http://relay.local:8080")
        );
        assert_eq!(config.telemetry.sources, vec!["gps".to_string()]);
    }

    #[test]
    fn rejects_shared_targets() {
        let err = parse(
            r#"
station_id = "pad-a"
command_log_target = "firing_station"
"#,
        )
        .expect_err("same target");
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn rejects_zero_intervals_and_duplicate_sources() {
        assert!(parse(
            r#"
station_id = "pad-a"
[sync]
silent_resync_interval_ms = 0
"#
        )
        .is_err());
        assert!(parse(
            r#"
station_id = "pad-a"
[telemetry]
sources = ["gps", "gps"]
"#
        )
        .is_err());
    }
}
