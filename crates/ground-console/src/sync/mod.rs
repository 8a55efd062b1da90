//! Command synchronization: drains the local send queue into the remote command
//! log and keeps the mission owner reconciled with the authoritative history.

mod baseline;
mod engine;
mod queue;


pub(crate) use baseline::Baseline;
pub(crate) use engine::{SyncEngine, SyncSettings};
pub(crate) use queue::SendQueue;

use mission_protocol::control::{SyncStatus, SyncView};
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncRequest {
    /// New commands were queued.
    Flush,
    /// Silent resync now instead of waiting for the interval.
    Resync,
    RetryBlockingSync,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SyncState {
    pub(crate) status: SyncStatus,
    pub(crate) last_ack_ms: Option<u64>,
    pub(crate) last_error: Option<String>,
}

impl SyncState {
    fn initial() -> Self {
        Self {
            status: SyncStatus::BlockedUntilSynced,
            last_ack_ms: None,
            last_error: None,
        }
    }
}

/// Cloneable front of the engine: request channel, status and queue view.
#[derive(Clone)]
pub(crate) struct SyncHandle {
    requests: mpsc::UnboundedSender<SyncRequest>,
    state: watch::Receiver<SyncState>,
    queue: SendQueue,
}

/// Engine side of [`SyncHandle`].
pub(crate) struct SyncLink {
    pub(crate) requests: mpsc::UnboundedReceiver<SyncRequest>,
    pub(crate) state: watch::Sender<SyncState>,
    pub(crate) queue: SendQueue,
}

pub(crate) fn channel() -> (SyncHandle, SyncLink) {
    let queue = SendQueue::default();
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(SyncState::initial());
    (
        SyncHandle {
            requests: request_tx,
            state: state_rx,
            queue: queue.clone(),
        },
        SyncLink {
            requests: request_rx,
            state: state_tx,
            queue,
        },
    )
}

impl SyncHandle {
    pub(crate) fn request(&self, request: SyncRequest) -> bool {
        if self.requests.send(request).is_err() {
            tracing::warn!(
                event = "sync.request.dropped",
                request = ?request,
                "sync engine is not running"
            );
            return false;
        }
        true
    }

    pub(crate) fn status(&self) -> SyncStatus {
        self.state.borrow().status
    }

    pub(crate) fn queue(&self) -> &SendQueue {
        &self.queue
    }

    pub(crate) fn view(&self) -> SyncView {
        let state = self.state.borrow().clone();
        SyncView {
            status: state.status,
            pending: self.queue.commands(),
            last_ack_ms: state.last_ack_ms,
            last_error: state.last_error,
        }
    }

    #[cfg(test)]
    pub(crate) fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }
}
