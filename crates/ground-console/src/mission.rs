use crate::events::ConsoleEvent;
use crate::sync::{Baseline, SyncHandle, SyncRequest};
use launch_machine::{
    replay_lenient, Guards, IllegalCommand, MissionContext, Panel, Snapshot, TopState,
};
use mission_protocol::control::SyncStatus;
use mission_protocol::{Command, CommandEnvelope, ManualMessage, ManualMessageError};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{broadcast, watch};

#[derive(Debug, Error)]
pub(crate) enum DispatchError {
    #[error(transparent)]
    Illegal(#[from] IllegalCommand),
    #[error("commands are not accepted while sync is {}", .0.as_str())]
    NotSynced(SyncStatus),
    #[error(transparent)]
    InvalidMessage(#[from] ManualMessageError),
}

/// Read model served to the control surface.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct MissionView {
    pub(crate) state: TopState,
    pub(crate) active_panel: Panel,
    pub(crate) active_states: Vec<String>,
    pub(crate) guards: Guards,
    pub(crate) context: MissionContext,
    pub(crate) sequence: u64,
    pub(crate) terminal: bool,
}

impl MissionView {
    pub(crate) fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            state: snapshot.state.clone(),
            active_panel: snapshot.active_panel(),
            active_states: snapshot.active_states(),
            guards: snapshot.guards,
            context: snapshot.context.clone(),
            sequence: snapshot.sequence,
            terminal: snapshot.is_terminal(),
        }
    }
}

struct MissionState {
    snapshot: Snapshot,
    /// Commands folded into `snapshot`, in application order.
    history: Vec<Command>,
}

/// Sole owner of the mission snapshot.
///
/// Operator commands are applied optimistically and queued for the command log;
/// authoritative baselines from the sync engine are reconciled here.
pub(crate) struct MissionControl {
    client_id: String,
    state: Mutex<MissionState>,
    snapshots: watch::Sender<Snapshot>,
    sync: SyncHandle,
    event_tx: broadcast::Sender<ConsoleEvent>,
}

impl MissionControl {
    pub(crate) fn new(
        client_id: String,
        sync: SyncHandle,
        event_tx: broadcast::Sender<ConsoleEvent>,
    ) -> Self {
        let snapshot = Snapshot::initial();
        let (snapshots, _) = watch::channel(snapshot.clone());
        Self {
            client_id,
            state: Mutex::new(MissionState {
                snapshot,
                history: Vec::new(),
            }),
            snapshots,
            sync,
            event_tx,
        }
    }

    pub(crate) fn client_id(&self) -> &str {
        &self.client_id
    }

    pub(crate) fn events(&self) -> broadcast::Sender<ConsoleEvent> {
        self.event_tx.clone()
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.subscribe()
    }

    /// Projects the current snapshot without cloning it.
    pub(crate) fn select<T>(&self, project: impl FnOnce(&Snapshot) -> T) -> T {
        project(&self.snapshots.borrow())
    }

    pub(crate) fn view(&self) -> MissionView {
        self.select(MissionView::from_snapshot)
    }

    pub(crate) fn history(&self) -> Vec<Command> {
        self.lock().history.clone()
    }

    pub(crate) fn can_apply(&self, command: &Command) -> bool {
        self.select(|snapshot| snapshot.can_apply(command)) && self.sync.status().accepts_commands()
    }

    /// Applies `command` locally and queues it for the command log.
    pub(crate) fn dispatch(&self, command: Command) -> Result<Snapshot, DispatchError> {
        if let Err(err) = command.validate() {
            tracing::warn!(
                event = "mission.dispatch.invalid",
                command = command.kind(),
                error = %err,
                "rejecting malformed command"
            );
            return Err(err.into());
        }
        let status = self.sync.status();
        if !status.accepts_commands() {
            tracing::warn!(
                event = "mission.dispatch.rejected",
                command = command.kind(),
                sync_status = status.as_str(),
                "sync is not ready for commands"
            );
            return Err(DispatchError::NotSynced(status));
        }
        let next = {
            let mut state = self.lock();
            let next = match state.snapshot.try_apply(&command) {
                Ok(next) => next,
                Err(err) => {
                    tracing::warn!(
                        event = "mission.dispatch.ignored",
                        command = command.kind(),
                        active_panel = ?state.snapshot.active_panel(),
                        "ignoring command the machine does not accept"
                    );
                    return Err(err.into());
                }
            };
            state.snapshot = next.clone();
            state.history.push(command.clone());
            self.snapshots.send_replace(next.clone());
            self.sync.queue().push(CommandEnvelope {
                command: command.clone(),
                client_id: self.client_id.clone(),
                issued_at_ms: record_store::now_ms(),
            });
            next
        };
        tracing::info!(
            event = "mission.dispatch.applied",
            command = command.kind(),
            sequence = next.sequence,
            "command applied locally"
        );
        self.announce(&next);
        self.sync.request(SyncRequest::Flush);
        Ok(next)
    }

    /// Validates raw operator input and dispatches it as a manual message.
    pub(crate) fn dispatch_manual_message(
        &self,
        target: &str,
        raw: &str,
    ) -> Result<Snapshot, DispatchError> {
        let message = ManualMessage::parse(target, raw)?;
        self.dispatch(Command::SendManualMessage { message })
    }

    /// Validates a raw JSON batch and dispatches it as one command.
    pub(crate) fn dispatch_manual_batch(&self, raw: &str) -> Result<Snapshot, DispatchError> {
        let messages = ManualMessage::parse_batch(raw)?;
        self.dispatch(Command::SendManualMessageBatch { messages })
    }

    /// Reconciles local optimistic state with a validated baseline.
    ///
    /// The authoritative state is `baseline ++ pending`; pending commands that no
    /// longer apply on top of the baseline are dropped from the queue. Returns
    /// true when the local history had diverged.
    pub(crate) fn apply_baseline(&self, baseline: &Baseline, authoritative: Snapshot) -> bool {
        let (rebased, diverged, local_len, authoritative_len) = {
            let mut state = self.lock();
            if state.snapshot.is_terminal() {
                return false;
            }
            let queue = self.sync.queue();
            let pending = queue.commands();
            let (rebased, skipped) = replay_lenient(authoritative, &pending);
            if !skipped.is_empty() {
                tracing::warn!(
                    event = "mission.pending.dropped",
                    dropped = skipped.len(),
                    "pending commands no longer apply on the authoritative history"
                );
                queue.remove_positions(&skipped);
            }
            let expected: Vec<Command> = baseline
                .commands()
                .cloned()
                .chain(
                    pending
                        .into_iter()
                        .enumerate()
                        .filter(|(index, _)| !skipped.contains(index))
                        .map(|(_, command)| command),
                )
                .collect();
            let diverged = state.history != expected || state.snapshot != rebased;
            let local_len = state.history.len();
            let authoritative_len = expected.len();
            state.snapshot = rebased.clone();
            state.history = expected;
            if diverged {
                self.snapshots.send_replace(rebased.clone());
            }
            (rebased, diverged, local_len, authoritative_len)
        };
        if diverged {
            tracing::warn!(
                event = "mission.divergence",
                local_len,
                authoritative_len,
                "local history diverged from the command log; rebasing"
            );
            let _ = self.event_tx.send(ConsoleEvent::DivergenceDetected {
                local_len,
                authoritative_len,
            });
            self.announce(&rebased);
        }
        diverged
    }

    /// Freezes the machine after the command log failed validation.
    pub(crate) fn report_inconsistent_baseline(&self, reason: String) {
        let frozen = {
            let mut state = self.lock();
            state.snapshot = state.snapshot.report_inconsistent_baseline(reason.clone());
            self.sync.queue().clear();
            self.snapshots.send_replace(state.snapshot.clone());
            state.snapshot.clone()
        };
        tracing::error!(
            event = "mission.baseline.inconsistent",
            reason = %reason,
            "command log is inconsistent; mission halted"
        );
        let _ = self
            .event_tx
            .send(ConsoleEvent::BaselineInconsistent { reason });
        self.announce(&frozen);
    }

    /// Broadcasts a snapshot already stored in the watch channel.
    fn announce(&self, snapshot: &Snapshot) {
        let _ = self.event_tx.send(ConsoleEvent::MissionUpdated {
            mission: MissionView::from_snapshot(snapshot),
        });
    }

    fn lock(&self) -> MutexGuard<'_, MissionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
