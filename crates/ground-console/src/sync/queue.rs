use mission_protocol::{Command, CommandEnvelope};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Commands applied locally but not yet acknowledged by the command log.
///
/// The mission owner pushes; only the sync engine pops, and only after the
/// append of the head has been acknowledged.
#[derive(Clone, Default)]
pub(crate) struct SendQueue {
    entries: Arc<Mutex<VecDeque<CommandEnvelope>>>,
}

impl SendQueue {
    pub(crate) fn push(&self, envelope: CommandEnvelope) {
        self.lock().push_back(envelope);
    }

    pub(crate) fn front(&self) -> Option<CommandEnvelope> {
        self.lock().front().cloned()
    }

    pub(crate) fn pop_front(&self) -> Option<CommandEnvelope> {
        self.lock().pop_front()
    }

    pub(crate) fn clear(&self) -> usize {
        let mut entries = self.lock();
        let cleared = entries.len();
        entries.clear();
        cleared
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn envelopes(&self) -> Vec<CommandEnvelope> {
        self.lock().iter().cloned().collect()
    }

    pub(crate) fn commands(&self) -> Vec<Command> {
        self.lock()
            .iter()
            .map(|envelope| envelope.command.clone())
            .collect()
    }

    /// Drops the entries at `positions` (indices into the current order).
    pub(crate) fn remove_positions(&self, positions: &[usize]) {
        if positions.is_empty() {
            return;
        }
        let mut entries = self.lock();
        let mut index = 0;
        entries.retain(|_| {
            let keep = !positions.contains(&index);
            index += 1;
            keep
        });
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<CommandEnvelope>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mission_protocol::GoPollRole;

    fn envelope(role: GoPollRole) -> CommandEnvelope {
        CommandEnvelope {
            command: Command::ToggleGoPoll { role },
            client_id: "test".to_string(),
            issued_at_ms: 1,
        }
    }

    #[test]
    fn keeps_submission_order() {
        let queue = SendQueue::default();
        queue.push(envelope(GoPollRole::Avionics));
        queue.push(envelope(GoPollRole::Recovery));
        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue.front().map(|entry| entry.command),
            Some(Command::ToggleGoPoll {
                role: GoPollRole::Avionics
            })
        );
        queue.pop_front();
        assert_eq!(
            queue.commands(),
            vec![Command::ToggleGoPoll {
                role: GoPollRole::Recovery
            }]
        );
    }

    #[test]
    fn removes_selected_positions() {
        let queue = SendQueue::default();
        for role in GoPollRole::ALL {
            queue.push(envelope(role));
        }
        queue.remove_positions(&[0, 3]);
        let roles: Vec<Command> = queue.commands();
        assert_eq!(
            roles,
            vec![
                Command::ToggleGoPoll {
                    role: GoPollRole::ALL[1]
                },
                Command::ToggleGoPoll {
                    role: GoPollRole::ALL[2]
                },
                Command::ToggleGoPoll {
                    role: GoPollRole::ALL[4]
                },
            ]
        );
        assert_eq!(queue.clear(), 3);
        assert!(queue.is_empty());
    }
}
