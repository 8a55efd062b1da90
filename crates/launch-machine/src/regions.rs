use crate::checklist::Checklist;
use mission_protocol::{Control, GoPollRole, PreFillItem, RangePermitEntry};
use serde::Serialize;

/// Three-state arm/execute cycle: not started, executing, stopped, executing, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Cycle {
    NotStarted,
    Executing,
    Stopped,
}

impl Cycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Cycle::NotStarted => "notStarted",
            Cycle::Executing => "executing",
            Cycle::Stopped => "stopped",
        }
    }
}

/// The fire cycle. `NotReady` is entered and left by the ready-to-fire guard only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FireCycle {
    NotReady,
    NotStarted,
    Executing,
    Stopped,
}

impl FireCycle {
    pub fn as_str(self) -> &'static str {
        match self {
            FireCycle::NotReady => "notReady",
            FireCycle::NotStarted => "notStarted",
            FireCycle::Executing => "executing",
            FireCycle::Stopped => "stopped",
        }
    }

    /// Applies the guarded always-transitions for the current readiness.
    pub(crate) fn settle(self, ready: bool) -> Self {
        match (self, ready) {
            (FireCycle::NotReady, true) => FireCycle::NotStarted,
            (FireCycle::NotStarted, false) | (FireCycle::Stopped, false) => FireCycle::NotReady,
            (cycle, _) => cycle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandCenter {
    pub keep: Cycle,
    pub arm: Cycle,
    pub fire: FireCycle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbortControl {
    pub arm: Cycle,
    pub abort: Cycle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchRegion {
    pub command_center: CommandCenter,
    pub abort_control: AbortControl,
}

impl LaunchRegion {
    pub(crate) fn new() -> Self {
        Self {
            command_center: CommandCenter {
                keep: Cycle::NotStarted,
                arm: Cycle::NotStarted,
                fire: FireCycle::NotReady,
            },
            abort_control: AbortControl {
                arm: Cycle::NotStarted,
                abort: Cycle::NotStarted,
            },
        }
    }

    fn cycle(&self, control: Control) -> Option<Cycle> {
        match control {
            Control::Keep => Some(self.command_center.keep),
            Control::Arm => Some(self.command_center.arm),
            Control::AbortArm => Some(self.abort_control.arm),
            Control::Abort => Some(self.abort_control.abort),
            Control::Fire => None,
        }
    }

    fn cycle_mut(&mut self, control: Control) -> Option<&mut Cycle> {
        match control {
            Control::Keep => Some(&mut self.command_center.keep),
            Control::Arm => Some(&mut self.command_center.arm),
            Control::AbortArm => Some(&mut self.abort_control.arm),
            Control::Abort => Some(&mut self.abort_control.abort),
            Control::Fire => None,
        }
    }

    pub fn is_executing(&self, control: Control) -> bool {
        match control {
            Control::Fire => self.command_center.fire == FireCycle::Executing,
            other => self.cycle(other) == Some(Cycle::Executing),
        }
    }

    /// Whether `control` sits in a state with an outgoing execute edge.
    pub fn can_execute(&self, control: Control) -> bool {
        match control {
            Control::Fire => matches!(
                self.command_center.fire,
                FireCycle::NotStarted | FireCycle::Stopped
            ),
            other => matches!(self.cycle(other), Some(Cycle::NotStarted | Cycle::Stopped)),
        }
    }

    pub fn any_executing(&self) -> bool {
        Control::ALL
            .iter()
            .any(|control| self.is_executing(*control))
    }

    pub fn both_arms_executing(&self) -> bool {
        self.command_center.arm == Cycle::Executing && self.abort_control.arm == Cycle::Executing
    }

    pub(crate) fn execute(&mut self, control: Control) {
        match control {
            Control::Fire => self.command_center.fire = FireCycle::Executing,
            other => {
                if let Some(cycle) = self.cycle_mut(other) {
                    *cycle = Cycle::Executing;
                }
            }
        }
    }

    pub(crate) fn stop(&mut self, control: Control) {
        match control {
            Control::Fire => self.command_center.fire = FireCycle::Stopped,
            other => {
                if let Some(cycle) = self.cycle_mut(other) {
                    *cycle = Cycle::Stopped;
                }
            }
        }
    }

    pub(crate) fn state_paths(&self, prefix: &str) -> Vec<String> {
        let command_center = &self.command_center;
        let abort_control = &self.abort_control;
        vec![
            format!("{prefix}.commandCenter.keep.{}", command_center.keep.as_str()),
            format!("{prefix}.commandCenter.arm.{}", command_center.arm.as_str()),
            format!("{prefix}.commandCenter.fire.{}", command_center.fire.as_str()),
            format!("{prefix}.abortControl.arm.{}", abort_control.arm.as_str()),
            format!("{prefix}.abortControl.abort.{}", abort_control.abort.as_str()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum OperationState {
    Standby {
        pre_fill_checklist: Checklist<PreFillItem>,
    },
    Launch(LaunchRegion),
}

impl OperationState {
    pub(crate) fn standby() -> Self {
        OperationState::Standby {
            pre_fill_checklist: Checklist::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreFireState {
    pub operation_state: OperationState,
    pub go_poll: Checklist<GoPollRole>,
}

impl PreFireState {
    pub(crate) fn new() -> Self {
        Self {
            operation_state: OperationState::standby(),
            go_poll: Checklist::new(),
        }
    }

    pub fn launch(&self) -> Option<&LaunchRegion> {
        match &self.operation_state {
            OperationState::Launch(launch) => Some(launch),
            OperationState::Standby { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum RecoveryState {
    PendingVisualContact,
    InFlight,
    Landed {
        range_permit: Checklist<RangePermitEntry>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum TopState {
    /// Transient entry state, advanced past before any snapshot is observed.
    ResetMachine,
    PreFire(PreFireState),
    Recovery(RecoveryState),
    InconsistentBaseline { reason: String },
}
