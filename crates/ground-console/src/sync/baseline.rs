use launch_machine::{replay, ReplayError, Snapshot};
use mission_protocol::{Command, CommandEnvelope};
use record_store::{RecordStore, StoreError};

/// The full remote command history of the session, schema-checked.
#[derive(Debug, Clone, Default)]
pub(crate) struct Baseline {
    pub(crate) entries: Vec<CommandEnvelope>,
    /// Receive time of the newest log message, valid or not.
    pub(crate) last_received_ms: Option<u64>,
    pub(crate) dropped: usize,
}

impl Baseline {
    pub(crate) fn commands(&self) -> impl Iterator<Item = &Command> + '_ {
        self.entries.iter().map(|entry| &entry.command)
    }

    /// Folds the history into a fresh machine, rejecting at the first illegal command.
    pub(crate) fn replay(&self) -> Result<Snapshot, ReplayError> {
        replay(self.commands())
    }
}

pub(crate) async fn fetch_baseline(
    store: &dyn RecordStore,
    target: &str,
) -> Result<Baseline, StoreError> {
    let messages = store.list_messages(target).await?;
    let mut baseline = Baseline {
        last_received_ms: messages.last().map(|message| message.received_at_ms),
        ..Baseline::default()
    };
    for message in messages {
        let parsed = serde_json::from_value::<CommandEnvelope>(message.data)
            .map_err(|err| err.to_string())
            .and_then(|envelope| {
                envelope
                    .command
                    .validate()
                    .map(|()| envelope)
                    .map_err(|err| err.to_string())
            });
        match parsed {
            Ok(envelope) => baseline.entries.push(envelope),
            Err(err) => {
                baseline.dropped += 1;
                tracing::warn!(
                    event = "sync.baseline.entry_dropped",
                    target = %target,
                    received_at_ms = message.received_at_ms,
                    error = %err,
                    "dropping command log entry that fails schema validation"
                );
            }
        }
    }
    Ok(baseline)
}
