use crate::StationOpState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const FIRING_STATION_SOURCE: &str = "firing_station";
pub const GPS_SOURCE: &str = "gps";
pub const LOAD_CELL_SOURCE: &str = "load_cells";
pub const THERMOCOUPLE_SOURCE: &str = "thermocouples";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayStates {
    #[serde(default)]
    pub fill: bool,
    #[serde(default)]
    pub vent: bool,
    #[serde(default)]
    pub dump: bool,
    #[serde(default)]
    pub purge: bool,
    #[serde(default)]
    pub igniter: bool,
}

impl RelayStates {
    pub fn named(&self) -> [(&'static str, bool); 5] {
        [
            ("fill", self.fill),
            ("vent", self.vent),
            ("dump", self.dump),
            ("purge", self.purge),
            ("igniter", self.igniter),
        ]
    }

    /// Relay layout the station drives for a given op state.
    pub fn for_op_state(op_state: &StationOpState) -> Self {
        match op_state {
            StationOpState::Standby => RelayStates::default(),
            StationOpState::Fill => RelayStates {
                fill: true,
                vent: true,
                ..RelayStates::default()
            },
            StationOpState::Purge => RelayStates {
                purge: true,
                vent: true,
                ..RelayStates::default()
            },
            StationOpState::Fire => RelayStates {
                igniter: true,
                ..RelayStates::default()
            },
            StationOpState::Abort => RelayStates {
                vent: true,
                dump: true,
                ..RelayStates::default()
            },
            StationOpState::Custom { relays } => *relays,
        }
    }
}

/// Device-bound message asking the firing station to change mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StationDirective {
    pub op_state: StationOpState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationRecord {
    pub op_state: StationOpState,
    pub relays: RelayStates,
    #[serde(default)]
    pub pressures_psi: BTreeMap<String, f64>,
    #[serde(default)]
    pub temperatures_c: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpsRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    #[serde(default)]
    pub satellites: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadCellRecord {
    pub cells_n: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThermocoupleRecord {
    pub probes_c: BTreeMap<String, f64>,
}
