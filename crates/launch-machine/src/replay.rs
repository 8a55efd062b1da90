use crate::machine::Snapshot;
use mission_protocol::Command;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("command #{number} ({kind}) is illegal after the {applied} commands before it")]
pub struct ReplayError {
    /// 1-based position of the rejected command.
    pub number: usize,
    pub kind: &'static str,
    pub applied: usize,
    /// State produced by the commands before the rejected one.
    pub last_valid: Snapshot,
}

/// Folds `commands` over the initial snapshot, stopping at the first illegal one.
pub fn replay<'a, I>(commands: I) -> Result<Snapshot, ReplayError>
where
    I: IntoIterator<Item = &'a Command>,
{
    let mut snapshot = Snapshot::initial();
    for (index, command) in commands.into_iter().enumerate() {
        snapshot = match snapshot.try_apply(command) {
            Ok(next) => next,
            Err(err) => {
                return Err(ReplayError {
                    number: index + 1,
                    kind: err.kind,
                    applied: index,
                    last_valid: snapshot,
                })
            }
        };
    }
    Ok(snapshot)
}

/// Applies each command that is legal at its turn; returns the resulting
/// snapshot and the positions of the commands that were skipped.
pub fn replay_lenient<'a, I>(start: Snapshot, commands: I) -> (Snapshot, Vec<usize>)
where
    I: IntoIterator<Item = &'a Command>,
{
    let mut snapshot = start;
    let mut skipped = Vec::new();
    for (index, command) in commands.into_iter().enumerate() {
        match snapshot.try_apply(command) {
            Ok(next) => snapshot = next,
            Err(_) => skipped.push(index),
        }
    }
    (snapshot, skipped)
}
