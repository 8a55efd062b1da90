use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod control;
pub mod station;

use crate::station::{RelayStates, StationDirective};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PreFillItem {
    PersonnelClear,
    FillLineConnected,
    VentValveClosed,
    IgniterInstalled,
    RecoveryArmed,
    TelemetryNominal,
    StationLinked,
}

impl PreFillItem {
    pub const ALL: [PreFillItem; 7] = [
        PreFillItem::PersonnelClear,
        PreFillItem::FillLineConnected,
        PreFillItem::VentValveClosed,
        PreFillItem::IgniterInstalled,
        PreFillItem::RecoveryArmed,
        PreFillItem::TelemetryNominal,
        PreFillItem::StationLinked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PreFillItem::PersonnelClear => "personnel_clear",
            PreFillItem::FillLineConnected => "fill_line_connected",
            PreFillItem::VentValveClosed => "vent_valve_closed",
            PreFillItem::IgniterInstalled => "igniter_installed",
            PreFillItem::RecoveryArmed => "recovery_armed",
            PreFillItem::TelemetryNominal => "telemetry_nominal",
            PreFillItem::StationLinked => "station_linked",
        }
    }
}

/// Sign-off roles polled before the launch commit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GoPollRole {
    FlightDirector,
    RangeSafety,
    Propulsion,
    Avionics,
    Recovery,
}

impl GoPollRole {
    pub const ALL: [GoPollRole; 5] = [
        GoPollRole::FlightDirector,
        GoPollRole::RangeSafety,
        GoPollRole::Propulsion,
        GoPollRole::Avionics,
        GoPollRole::Recovery,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GoPollRole::FlightDirector => "flight_director",
            GoPollRole::RangeSafety => "range_safety",
            GoPollRole::Propulsion => "propulsion",
            GoPollRole::Avionics => "avionics",
            GoPollRole::Recovery => "recovery",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RangePermitEntry {
    AirspaceCleared,
    RangeCleared,
    RecoveryTeamReady,
}

impl RangePermitEntry {
    pub const ALL: [RangePermitEntry; 3] = [
        RangePermitEntry::AirspaceCleared,
        RangePermitEntry::RangeCleared,
        RangePermitEntry::RecoveryTeamReady,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RangePermitEntry::AirspaceCleared => "airspace_cleared",
            RangePermitEntry::RangeCleared => "range_cleared",
            RangePermitEntry::RecoveryTeamReady => "recovery_team_ready",
        }
    }
}

/// Launch-mode controls that cycle through not-started, executing and stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    Keep,
    Arm,
    Fire,
    AbortArm,
    Abort,
}

impl Control {
    pub const ALL: [Control; 5] = [
        Control::Keep,
        Control::Arm,
        Control::Fire,
        Control::AbortArm,
        Control::Abort,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Control::Keep => "keep",
            Control::Arm => "arm",
            Control::Fire => "fire",
            Control::AbortArm => "abort_arm",
            Control::Abort => "abort",
        }
    }
}

/// Operational mode requested from the firing station.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StationOpState {
    Standby,
    Fill,
    Purge,
    Fire,
    Abort,
    Custom { relays: RelayStates },
}

impl StationOpState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StationOpState::Standby => "standby",
            StationOpState::Fill => "fill",
            StationOpState::Purge => "purge",
            StationOpState::Fire => "fire",
            StationOpState::Abort => "abort",
            StationOpState::Custom { .. } => "custom",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManualMessage {
    pub target: String,
    pub data: Value,
}

#[derive(Debug, Error)]
pub enum ManualMessageError {
    #[error("manual message target cannot be empty")]
    EmptyTarget,
    #[error("manual message payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("manual message batch cannot be empty")]
    EmptyBatch,
}

impl ManualMessage {
    /// Validates operator input before it can become a command.
    pub fn parse(target: &str, raw: &str) -> Result<Self, ManualMessageError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(ManualMessageError::EmptyTarget);
        }
        let data = serde_json::from_str(raw)?;
        Ok(Self {
            target: target.to_string(),
            data,
        })
    }

    /// Parses a JSON array of `{target, data}` objects.
    pub fn parse_batch(raw: &str) -> Result<Vec<Self>, ManualMessageError> {
        let messages: Vec<ManualMessage> = serde_json::from_str(raw)?;
        validate_batch(&messages)?;
        Ok(messages)
    }

    pub fn validate(&self) -> Result<(), ManualMessageError> {
        if self.target.trim().is_empty() {
            return Err(ManualMessageError::EmptyTarget);
        }
        Ok(())
    }
}

fn validate_batch(messages: &[ManualMessage]) -> Result<(), ManualMessageError> {
    if messages.is_empty() {
        return Err(ManualMessageError::EmptyBatch);
    }
    messages.iter().try_for_each(ManualMessage::validate)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    TogglePreFillItem { item: PreFillItem },
    ToggleGoPoll { role: GoPollRole },
    ToggleRangePermit { entry: RangePermitEntry },
    GoToLaunchMode,
    GoToRecoveryMode,
    ReturnToStandbyMode,
    Execute { control: Control },
    Stop { control: Control },
    ConfirmVisualContact,
    ConfirmLanding,
    MutateStationOpState { op_state: StationOpState },
    SendManualMessage { message: ManualMessage },
    SendManualMessageBatch { messages: Vec<ManualMessage> },
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::TogglePreFillItem { .. } => "TOGGLE_PRE_FILL_ITEM",
            Command::ToggleGoPoll { .. } => "TOGGLE_GO_POLL",
            Command::ToggleRangePermit { .. } => "TOGGLE_RANGE_PERMIT",
            Command::GoToLaunchMode => "GO_TO_LAUNCH_MODE",
            Command::GoToRecoveryMode => "GO_TO_RECOVERY_MODE",
            Command::ReturnToStandbyMode => "RETURN_TO_STANDBY_MODE",
            Command::Execute { .. } => "EXECUTE",
            Command::Stop { .. } => "STOP",
            Command::ConfirmVisualContact => "CONFIRM_VISUAL_CONTACT",
            Command::ConfirmLanding => "CONFIRM_LANDING",
            Command::MutateStationOpState { .. } => "MUTATE_STATION_OP_STATE",
            Command::SendManualMessage { .. } => "SEND_MANUAL_MESSAGE",
            Command::SendManualMessageBatch { .. } => "SEND_MANUAL_MESSAGE_BATCH",
        }
    }

    /// Checks the operator-supplied parts of a command that serde cannot.
    pub fn validate(&self) -> Result<(), ManualMessageError> {
        match self {
            Command::SendManualMessage { message } => message.validate(),
            Command::SendManualMessageBatch { messages } => validate_batch(messages),
            _ => Ok(()),
        }
    }

    /// Messages that must reach a device once the command is durable.
    pub fn device_messages(&self, station_target: &str) -> Vec<(String, Value)> {
        match self {
            Command::MutateStationOpState { op_state } => {
                let directive = StationDirective {
                    op_state: op_state.clone(),
                };
                match serde_json::to_value(directive) {
                    Ok(data) => vec![(station_target.to_string(), data)],
                    Err(_) => Vec::new(),
                }
            }
            Command::SendManualMessage { message } => {
                vec![(message.target.clone(), message.data.clone())]
            }
            Command::SendManualMessageBatch { messages } => messages
                .iter()
                .map(|message| (message.target.clone(), message.data.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// One entry of the remote command log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandEnvelope {
    pub command: Command,
    pub client_id: String,
    pub issued_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_uses_screaming_type_tag() {
        let command = Command::Execute {
            control: Control::AbortArm,
        };
        let value = serde_json::to_value(&command).expect("serialize");
        assert_eq!(value, json!({"type": "EXECUTE", "control": "abort_arm"}));

        let decoded: Command =
            serde_json::from_value(json!({"type": "GO_TO_LAUNCH_MODE"})).expect("deserialize");
        assert_eq!(decoded, Command::GoToLaunchMode);
    }

    #[test]
    fn custom_op_state_carries_relays() {
        let raw = json!({
            "type": "MUTATE_STATION_OP_STATE",
            "op_state": {
                "state": "custom",
                "relays": {"fill": true, "vent": false, "dump": false, "purge": true, "igniter": false}
            }
        });
        let command: Command = serde_json::from_value(raw).expect("deserialize");
        let Command::MutateStationOpState {
            op_state: StationOpState::Custom { relays },
        } = command
        else {
            panic!("expected custom op state");
        };
        assert!(relays.fill);
        assert!(relays.purge);
        assert!(!relays.igniter);
    }

    #[test]
    fn unknown_command_type_fails_validation() {
        let raw = json!({"type": "LAUNCH_EVERYTHING"});
        assert!(serde_json::from_value::<Command>(raw).is_err());
    }

    #[test]
    fn manual_message_rejects_bad_json() {
        let err = ManualMessage::parse("loadcell", "{\"tare\": ").expect_err("invalid json");
        assert!(matches!(err, ManualMessageError::InvalidJson(_)));
        let err = ManualMessage::parse("  ", "{}").expect_err("empty target");
        assert!(matches!(err, ManualMessageError::EmptyTarget));

        let message = ManualMessage::parse(" loadcell ", "{\"tare\": true}").expect("valid");
        assert_eq!(message.target, "loadcell");
        assert_eq!(message.data, json!({"tare": true}));
    }

    #[test]
    fn manual_batch_requires_entries() {
        let err = ManualMessage::parse_batch("[]").expect_err("empty batch");
        assert!(matches!(err, ManualMessageError::EmptyBatch));

        let batch = ManualMessage::parse_batch(
            r#"[{"target": "gps", "data": {"reset": true}}, {"target": "loadcell", "data": 4}]"#,
        )
        .expect("batch");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].data, json!(4));
    }

    #[test]
    fn manual_commands_are_validated_without_parsing() {
        let batch = Command::SendManualMessageBatch {
            messages: vec![ManualMessage {
                target: String::new(),
                data: json!({}),
            }],
        };
        assert!(matches!(
            batch.validate(),
            Err(ManualMessageError::EmptyTarget)
        ));
        let empty = Command::SendManualMessageBatch {
            messages: Vec::new(),
        };
        assert!(matches!(
            empty.validate(),
            Err(ManualMessageError::EmptyBatch)
        ));
        let single = Command::SendManualMessage {
            message: ManualMessage {
                target: " ".to_string(),
                data: json!(1),
            },
        };
        assert!(single.validate().is_err());
        assert!(Command::GoToLaunchMode.validate().is_ok());

        let err = ManualMessage::parse_batch(r#"[{"target": "", "data": 1}]"#)
            .expect_err("empty target in batch");
        assert!(matches!(err, ManualMessageError::EmptyTarget));
    }

    #[test]
    fn op_state_command_targets_station() {
        let command = Command::MutateStationOpState {
            op_state: StationOpState::Purge,
        };
        let messages = command.device_messages("firing_station");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "firing_station");
        assert_eq!(messages[0].1, json!({"op_state": {"state": "purge"}}));
        assert!(Command::GoToLaunchMode
            .device_messages("firing_station")
            .is_empty());
    }
}
