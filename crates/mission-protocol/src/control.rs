use crate::Command;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    BlockedUntilSynced,
    Idle,
    SilentlySyncing,
    Sending,
    SyncError,
    Halted,
}

impl SyncStatus {
    /// Whether a new operator command may be queued.
    pub fn accepts_commands(self) -> bool {
        matches!(
            self,
            SyncStatus::Idle | SyncStatus::SilentlySyncing | SyncStatus::Sending
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::BlockedUntilSynced => "blocked_until_synced",
            SyncStatus::Idle => "idle",
            SyncStatus::SilentlySyncing => "silently_syncing",
            SyncStatus::Sending => "sending",
            SyncStatus::SyncError => "sync_error",
            SyncStatus::Halted => "halted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncView {
    pub status: SyncStatus,
    pub pending: Vec<Command>,
    pub last_ack_ms: Option<u64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub command: Command,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CanApplyResponse {
    pub legal: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManualMessageRequest {
    pub target: String,
    pub payload: String,
}

/// `payload` is a JSON array of `{target, data}` objects, as typed by the operator.
#[derive(Debug, Serialize, Deserialize)]
pub struct ManualMessageBatchRequest {
    pub payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SignalSample {
    pub timestamp_ms: u64,
    pub value: f64,
}
