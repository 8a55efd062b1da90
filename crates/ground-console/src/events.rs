use crate::mission::MissionView;
use mission_protocol::control::SyncView;
use mission_protocol::station::StationRecord;
use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ConsoleEvent {
    /// First frame for a new subscriber.
    MissionSnapshot {
        mission: MissionView,
        sync: SyncView,
    },
    MissionUpdated {
        mission: MissionView,
    },
    SyncUpdated {
        sync: SyncView,
    },
    DivergenceDetected {
        local_len: usize,
        authoritative_len: usize,
    },
    BaselineInconsistent {
        reason: String,
    },
    StationUpdated {
        station: StationRecord,
    },
}
