use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use mission_protocol::station::{
    GpsRecord, LoadCellRecord, RelayStates, StationDirective, StationRecord, ThermocoupleRecord,
    FIRING_STATION_SOURCE, GPS_SOURCE, LOAD_CELL_SOURCE, THERMOCOUPLE_SOURCE,
};
use mission_protocol::StationOpState;
use record_store::{NewRecord, RecordStore, StoreError};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TANK_FILL_RATE_PSI: f64 = 35.0;
const TANK_VENT_RATE_PSI: f64 = 20.0;
const TANK_DUMP_RATE_PSI: f64 = 80.0;
const TANK_MAX_PSI: f64 = 850.0;
const SUPPLY_PSI: f64 = 900.0;
const IGNITION_THRUST_N: f64 = 1_800.0;

/// Stand-in firing station for dry runs: follows op-state directives and
/// reports its relays and a crude tank model through the relay store.
pub(crate) struct StationSimulator {
    store: Arc<dyn RecordStore>,
    station_target: String,
    interval: Duration,
    op_state: StationOpState,
    relays: RelayStates,
    tank_psi: f64,
    tick: u64,
}

impl StationSimulator {
    pub(crate) fn new(store: Arc<dyn RecordStore>, station_target: String, interval: Duration) -> Self {
        Self {
            store,
            station_target,
            interval,
            op_state: StationOpState::Standby,
            relays: RelayStates::default(),
            tank_psi: 0.0,
            tick: 0,
        }
    }

    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        info!(
            event = "simulator.start",
            target = %self.station_target,
            "station simulator started"
        );
        if let Err(err) = self.publish_initial().await {
            warn!(event = "simulator.publish.failed", error = %err, "initial sample failed");
        }
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            if let Err(err) = self.step().await {
                warn!(event = "simulator.step.failed", error = %err, "simulator step failed");
            }
        }
        info!(event = "simulator.stop", "station simulator stopped");
    }

    async fn publish_initial(&mut self) -> Result<(), StoreError> {
        let record = NewRecord {
            data: to_value(&self.station_record())?,
            timestamp_ms: None,
        };
        self.store
            .batch_create_records(FIRING_STATION_SOURCE, vec![record])
            .await
    }

    async fn step(&mut self) -> Result<(), StoreError> {
        while let Some(message) = self.store.get_next_message(&self.station_target).await? {
            match serde_json::from_value::<StationDirective>(message.data) {
                Ok(directive) => self.apply(directive.op_state),
                Err(_) => debug!(
                    event = "simulator.message.ignored",
                    received_at_ms = message.received_at_ms,
                    "message is not an op-state directive"
                ),
            }
        }
        self.tick += 1;
        self.advance_tank();
        self.store
            .create_record(FIRING_STATION_SOURCE, to_value(&self.station_record())?, None)
            .await?;
        self.store
            .create_record(GPS_SOURCE, to_value(&self.gps_record())?, None)
            .await?;
        self.store
            .create_record(LOAD_CELL_SOURCE, to_value(&self.load_cell_record())?, None)
            .await?;
        self.store
            .create_record(THERMOCOUPLE_SOURCE, to_value(&self.thermocouple_record())?, None)
            .await
    }

    fn apply(&mut self, op_state: StationOpState) {
        info!(
            event = "simulator.op_state",
            from = self.op_state.as_str(),
            to = op_state.as_str(),
            "station op state changed"
        );
        self.relays = RelayStates::for_op_state(&op_state);
        self.op_state = op_state;
    }

    fn advance_tank(&mut self) {
        if self.relays.fill {
            self.tank_psi += TANK_FILL_RATE_PSI;
        }
        if self.relays.vent {
            self.tank_psi -= TANK_VENT_RATE_PSI;
        }
        if self.relays.dump {
            self.tank_psi -= TANK_DUMP_RATE_PSI;
        }
        self.tank_psi = self.tank_psi.clamp(0.0, TANK_MAX_PSI);
    }

    fn station_record(&self) -> StationRecord {
        let line_psi = if self.relays.fill { SUPPLY_PSI } else { self.tank_psi };
        StationRecord {
            op_state: self.op_state.clone(),
            relays: self.relays,
            pressures_psi: BTreeMap::from([
                ("tank".to_string(), self.tank_psi),
                ("line".to_string(), line_psi),
            ]),
            temperatures_c: BTreeMap::from([("tank".to_string(), 15.0 - self.tank_psi / 100.0)]),
        }
    }

    fn gps_record(&self) -> GpsRecord {
        GpsRecord {
            latitude: 35.347,
            longitude: -117.808,
            altitude_m: 620.0,
            satellites: Some(9),
        }
    }

    fn load_cell_record(&self) -> LoadCellRecord {
        let thrust = if self.relays.igniter { IGNITION_THRUST_N } else { 0.0 };
        LoadCellRecord {
            cells_n: BTreeMap::from([
                ("thrust".to_string(), thrust),
                ("tank_mass".to_string(), self.tank_psi * 0.02),
            ]),
        }
    }

    fn thermocouple_record(&self) -> ThermocoupleRecord {
        let chamber = if self.relays.igniter {
            900.0 + (self.tick % 10) as f64
        } else {
            18.0
        };
        ThermocoupleRecord {
            probes_c: BTreeMap::from([("chamber".to_string(), chamber)]),
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|err| StoreError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use record_store::{MemoryStore, RecordQuery, StoreScope};
    use serde_json::json;

    #[tokio::test]
    async fn follows_directives_and_reports_relays() {
        let memory = MemoryStore::new(StoreScope::new("pad-a", Some("dry".to_string())));
        memory
            .create_message("firing_station", json!({"op_state": {"state": "fill"}}), None)
            .await
            .expect("directive");
        memory
            .create_message("firing_station", json!({"hello": "station"}), None)
            .await
            .expect("manual");

        let mut simulator = StationSimulator::new(
            Arc::new(memory.clone()),
            "firing_station".to_string(),
            Duration::from_millis(10),
        );
        simulator.publish_initial().await.expect("initial");
        simulator.step().await.expect("step");

        assert_eq!(simulator.op_state, StationOpState::Fill);
        let records = memory
            .list_records(FIRING_STATION_SOURCE, RecordQuery::default())
            .await
            .expect("records");
        assert_eq!(records.len(), 2);
        let latest: StationRecord =
            serde_json::from_value(records[1].data.clone()).expect("station record");
        assert!(latest.relays.fill && latest.relays.vent);
        assert_eq!(latest.pressures_psi.get("tank"), Some(&15.0));
        assert!(memory
            .get_next_message("firing_station")
            .await
            .expect("next")
            .is_none());
    }
}
