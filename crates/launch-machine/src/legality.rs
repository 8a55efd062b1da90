use crate::machine::Snapshot;
use crate::regions::{RecoveryState, TopState};
use mission_protocol::{Command, Control, StationOpState};

/// Whether the machine accepts `command` in the configuration held by `snapshot`.
///
/// Pure: the same predicate backs button enabling, local dispatch and baseline
/// replay validation.
pub fn can_apply(snapshot: &Snapshot, command: &Command) -> bool {
    if !can_send(snapshot) {
        return false;
    }
    match command {
        Command::TogglePreFillItem { .. } => snapshot.in_standby(),
        Command::ToggleGoPoll { .. } => snapshot.pre_fire().is_some(),
        Command::ToggleRangePermit { .. } => is_landed(snapshot),
        Command::GoToLaunchMode => {
            snapshot.in_standby() && snapshot.guards.pre_fill_checklist_complete
        }
        Command::GoToRecoveryMode => snapshot
            .launch()
            .map(|launch| launch.is_executing(Control::Fire))
            .unwrap_or(false),
        Command::ReturnToStandbyMode => {
            let scrub = snapshot
                .launch()
                .map(|launch| !launch.any_executing())
                .unwrap_or(false);
            scrub || is_landed(snapshot)
        }
        Command::Execute { control } => {
            let Some(launch) = snapshot.launch() else {
                return false;
            };
            let gated = *control != Control::Fire || snapshot.guards.ready_to_fire;
            launch.can_execute(*control) && gated
        }
        Command::Stop { control } => snapshot
            .launch()
            .map(|launch| launch.is_executing(*control))
            .unwrap_or(false),
        Command::ConfirmVisualContact => matches!(
            snapshot.recovery(),
            Some(RecoveryState::PendingVisualContact)
        ),
        Command::ConfirmLanding => matches!(snapshot.recovery(), Some(RecoveryState::InFlight)),
        Command::MutateStationOpState { op_state } => match op_state {
            StationOpState::Standby | StationOpState::Purge | StationOpState::Abort => true,
            StationOpState::Fill | StationOpState::Custom { .. } => snapshot.pre_fire().is_some(),
            StationOpState::Fire => snapshot.guards.ready_to_fire,
        },
        Command::SendManualMessage { .. } => true,
        Command::SendManualMessageBatch { messages } => !messages.is_empty(),
    }
}

/// Generic gate for anything leaving this client: the machine is not frozen.
pub fn can_send(snapshot: &Snapshot) -> bool {
    !matches!(
        snapshot.state,
        TopState::InconsistentBaseline { .. } | TopState::ResetMachine
    )
}

fn is_landed(snapshot: &Snapshot) -> bool {
    matches!(snapshot.recovery(), Some(RecoveryState::Landed { .. }))
}
