use crate::checklist::Checklist;
use crate::legality::can_apply;
use crate::regions::{LaunchRegion, OperationState, PreFireState, RecoveryState, TopState};
use mission_protocol::{Command, StationOpState};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MissionContext {
    /// Last op state commanded to the firing station.
    pub station_op_state: Option<StationOpState>,
    pub manual_messages_sent: u64,
}

/// Values derived from the state tree after every mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Guards {
    pub pre_fill_checklist_complete: bool,
    pub go_poll_complete: bool,
    pub ready_to_fire: bool,
    /// Computed for display; no transition depends on it.
    pub range_permit_complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Panel {
    Checklist,
    Launch,
    Recovery,
    Halted,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("command {kind} is not accepted in the current configuration")]
pub struct IllegalCommand {
    pub kind: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub state: TopState,
    pub context: MissionContext,
    pub guards: Guards,
    /// Number of commands folded into this snapshot.
    pub sequence: u64,
}

impl Snapshot {
    pub fn initial() -> Self {
        let mut snapshot = Snapshot {
            state: TopState::ResetMachine,
            context: MissionContext::default(),
            guards: Guards::default(),
            sequence: 0,
        };
        snapshot.settle();
        snapshot
    }

    pub fn can_apply(&self, command: &Command) -> bool {
        can_apply(self, command)
    }

    pub fn try_apply(&self, command: &Command) -> Result<Snapshot, IllegalCommand> {
        if !can_apply(self, command) {
            return Err(IllegalCommand {
                kind: command.kind(),
            });
        }
        let mut next = self.clone();
        next.transition(command);
        next.settle();
        next.sequence += 1;
        Ok(next)
    }

    /// Applies `command`, leaving the snapshot unchanged when it is not accepted.
    pub fn apply(&self, command: &Command) -> Snapshot {
        match self.try_apply(command) {
            Ok(next) => next,
            Err(err) => {
                tracing::warn!(
                    event = "machine.command.ignored",
                    command = command.kind(),
                    active_panel = ?self.active_panel(),
                    error = %err,
                    "ignoring command the machine does not accept"
                );
                self.clone()
            }
        }
    }

    /// Global event: the replayed baseline failed validation. Terminal.
    pub fn report_inconsistent_baseline(&self, reason: impl Into<String>) -> Snapshot {
        let mut next = self.clone();
        next.state = TopState::InconsistentBaseline {
            reason: reason.into(),
        };
        next.settle();
        next
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, TopState::InconsistentBaseline { .. })
    }

    pub fn pre_fire(&self) -> Option<&PreFireState> {
        match &self.state {
            TopState::PreFire(pre_fire) => Some(pre_fire),
            _ => None,
        }
    }

    pub fn launch(&self) -> Option<&LaunchRegion> {
        self.pre_fire().and_then(PreFireState::launch)
    }

    pub fn recovery(&self) -> Option<&RecoveryState> {
        match &self.state {
            TopState::Recovery(recovery) => Some(recovery),
            _ => None,
        }
    }

    pub fn in_standby(&self) -> bool {
        matches!(
            self.pre_fire().map(|pre_fire| &pre_fire.operation_state),
            Some(OperationState::Standby { .. })
        )
    }

    pub fn active_panel(&self) -> Panel {
        match &self.state {
            TopState::ResetMachine => Panel::Checklist,
            TopState::PreFire(pre_fire) => match pre_fire.operation_state {
                OperationState::Standby { .. } => Panel::Checklist,
                OperationState::Launch(_) => Panel::Launch,
            },
            TopState::Recovery(_) => Panel::Recovery,
            TopState::InconsistentBaseline { .. } => Panel::Halted,
        }
    }

    /// Active leaf paths, one per orthogonal region.
    pub fn active_states(&self) -> Vec<String> {
        match &self.state {
            TopState::ResetMachine => vec!["resetMachine".to_string()],
            TopState::PreFire(pre_fire) => {
                let mut paths = Vec::new();
                match &pre_fire.operation_state {
                    OperationState::Standby { pre_fill_checklist } => {
                        for (item, toggle) in pre_fill_checklist.iter() {
                            paths.push(format!(
                                "preFire.operationState.standby.preFillChecklist.{}.{}",
                                item.as_str(),
                                toggle.as_str()
                            ));
                        }
                        paths.push(format!(
                            "preFire.operationState.standby.preFillChecklistComplete.{}",
                            yes_no(self.guards.pre_fill_checklist_complete)
                        ));
                    }
                    OperationState::Launch(launch) => {
                        paths.extend(launch.state_paths("preFire.operationState.launch"));
                    }
                }
                for (role, toggle) in pre_fire.go_poll.iter() {
                    paths.push(format!("preFire.goPoll.{}.{}", role.as_str(), toggle.as_str()));
                }
                paths
            }
            TopState::Recovery(RecoveryState::PendingVisualContact) => {
                vec!["recovery.pendingVisualContact".to_string()]
            }
            TopState::Recovery(RecoveryState::InFlight) => vec!["recovery.inFlight".to_string()],
            TopState::Recovery(RecoveryState::Landed { range_permit }) => range_permit
                .iter()
                .map(|(entry, toggle)| {
                    format!(
                        "recovery.landed.rangePermit.{}.{}",
                        entry.as_str(),
                        toggle.as_str()
                    )
                })
                .collect(),
            TopState::InconsistentBaseline { .. } => vec!["inconsistentBaseline".to_string()],
        }
    }

    /// True when some active path equals `prefix` or descends from it.
    pub fn matches(&self, prefix: &str) -> bool {
        self.active_states().iter().any(|path| {
            path == prefix
                || path
                    .strip_prefix(prefix)
                    .map(|rest| rest.starts_with('.'))
                    .unwrap_or(false)
        })
    }

    fn transition(&mut self, command: &Command) {
        match command {
            Command::TogglePreFillItem { item } => {
                if let TopState::PreFire(PreFireState {
                    operation_state: OperationState::Standby { pre_fill_checklist },
                    ..
                }) = &mut self.state
                {
                    pre_fill_checklist.toggle(*item);
                }
            }
            Command::ToggleGoPoll { role } => {
                if let TopState::PreFire(pre_fire) = &mut self.state {
                    pre_fire.go_poll.toggle(*role);
                }
            }
            Command::ToggleRangePermit { entry } => {
                if let TopState::Recovery(RecoveryState::Landed { range_permit }) = &mut self.state
                {
                    range_permit.toggle(*entry);
                }
            }
            Command::GoToLaunchMode => {
                if let TopState::PreFire(pre_fire) = &mut self.state {
                    pre_fire.operation_state = OperationState::Launch(LaunchRegion::new());
                }
            }
            Command::GoToRecoveryMode => {
                self.state = TopState::Recovery(RecoveryState::PendingVisualContact);
            }
            Command::ReturnToStandbyMode => match &mut self.state {
                TopState::PreFire(pre_fire) => {
                    pre_fire.operation_state = OperationState::standby();
                }
                TopState::Recovery(RecoveryState::Landed { .. }) => {
                    self.state = TopState::PreFire(PreFireState::new());
                }
                _ => {}
            },
            Command::Execute { control } => {
                if let Some(launch) = self.launch_mut() {
                    launch.execute(*control);
                }
            }
            Command::Stop { control } => {
                if let Some(launch) = self.launch_mut() {
                    launch.stop(*control);
                }
            }
            Command::ConfirmVisualContact => {
                self.state = TopState::Recovery(RecoveryState::InFlight);
            }
            Command::ConfirmLanding => {
                self.state = TopState::Recovery(RecoveryState::Landed {
                    range_permit: Checklist::new(),
                });
            }
            Command::MutateStationOpState { op_state } => {
                self.context.station_op_state = Some(op_state.clone());
            }
            Command::SendManualMessage { .. } => {
                self.context.manual_messages_sent += 1;
            }
            Command::SendManualMessageBatch { messages } => {
                self.context.manual_messages_sent += messages.len() as u64;
            }
        }
    }

    fn launch_mut(&mut self) -> Option<&mut LaunchRegion> {
        match &mut self.state {
            TopState::PreFire(PreFireState {
                operation_state: OperationState::Launch(launch),
                ..
            }) => Some(launch),
            _ => None,
        }
    }

    /// Runs eventless transitions and recomputes guards until nothing changes.
    fn settle(&mut self) {
        if self.state == TopState::ResetMachine {
            self.state = TopState::PreFire(PreFireState::new());
        }
        loop {
            self.guards = derive_guards(&self.state);
            let ready = self.guards.ready_to_fire;
            let Some(launch) = self.launch_mut() else {
                break;
            };
            let settled = launch.command_center.fire.settle(ready);
            if settled == launch.command_center.fire {
                break;
            }
            launch.command_center.fire = settled;
        }
    }
}

fn derive_guards(state: &TopState) -> Guards {
    match state {
        TopState::PreFire(pre_fire) => {
            let go_poll_complete = pre_fire.go_poll.complete();
            match &pre_fire.operation_state {
                OperationState::Standby { pre_fill_checklist } => Guards {
                    pre_fill_checklist_complete: pre_fill_checklist.complete(),
                    go_poll_complete,
                    ..Guards::default()
                },
                OperationState::Launch(launch) => Guards {
                    go_poll_complete,
                    ready_to_fire: go_poll_complete && launch.both_arms_executing(),
                    ..Guards::default()
                },
            }
        }
        TopState::Recovery(RecoveryState::Landed { range_permit }) => Guards {
            range_permit_complete: range_permit.complete(),
            ..Guards::default()
        },
        _ => Guards::default(),
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
