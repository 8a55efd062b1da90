//! Station telemetry: polled device records reduced into per-signal ring buffers.

mod buffer;
mod decode;

pub(crate) use buffer::{pressure_delta, SignalStore};
pub(crate) use decode::decode_record;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use mission_protocol::control::SignalSample;
use mission_protocol::station::StationRecord;
use record_store::{Record, RecordQuery, RecordStore};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::ConsoleEvent;

struct TelemetryState {
    signals: SignalStore,
    /// Last decoded firing-station record, shown next to the commanded op state.
    station: Option<StationRecord>,
    dropped: u64,
}

/// Shared telemetry view; advisory only, never consulted for command legality.
#[derive(Clone)]
pub(crate) struct Telemetry {
    state: Arc<RwLock<TelemetryState>>,
}

impl Telemetry {
    pub(crate) fn new(buffer_capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(TelemetryState {
                signals: SignalStore::new(buffer_capacity),
                station: None,
                dropped: 0,
            })),
        }
    }

    /// Decodes and appends records; returns the newest station record among them.
    pub(crate) async fn ingest(
        &self,
        source: &str,
        records: Vec<Record>,
    ) -> Option<StationRecord> {
        let mut state = self.state.write().await;
        let mut station = None;
        for record in records {
            let timestamp_ms = record.timestamp_ms;
            match decode_record(source, record.data) {
                Ok(decoded) => {
                    for (signal, value) in decoded.signals {
                        state.signals.append(
                            &signal,
                            SignalSample {
                                timestamp_ms,
                                value,
                            },
                        );
                    }
                    if decoded.station.is_some() {
                        station = decoded.station;
                    }
                }
                Err(err) => {
                    state.dropped += 1;
                    debug!(
                        event = "telemetry.record.dropped",
                        source,
                        timestamp_ms,
                        error = %err,
                        "dropping malformed device record"
                    );
                }
            }
        }
        if station.is_some() {
            state.station = station.clone();
        }
        station
    }

    pub(crate) async fn latest(&self) -> BTreeMap<String, SignalSample> {
        self.state.read().await.signals.latest_all()
    }

    pub(crate) async fn range(
        &self,
        signal: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> Vec<SignalSample> {
        self.state.read().await.signals.range(signal, start, end)
    }

    pub(crate) async fn pressure_delta(
        &self,
        upstream: &str,
        downstream: &str,
        tolerance_ms: u64,
    ) -> Option<f64> {
        let state = self.state.read().await;
        pressure_delta(&state.signals, upstream, downstream, tolerance_ms)
    }

    pub(crate) async fn station(&self) -> Option<StationRecord> {
        self.state.read().await.station.clone()
    }

    pub(crate) async fn dropped(&self) -> u64 {
        self.state.read().await.dropped
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PollSettings {
    pub(crate) interval: Duration,
    pub(crate) take: usize,
}

pub(crate) fn spawn_pollers(
    store: Arc<dyn RecordStore>,
    telemetry: Telemetry,
    sources: Vec<String>,
    settings: PollSettings,
    event_tx: broadcast::Sender<ConsoleEvent>,
    shutdown: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    sources
        .into_iter()
        .map(|source| {
            info!(event = "telemetry.poller.spawned", source = %source, "telemetry poller spawned");
            tokio::spawn(poll_source(
                Arc::clone(&store),
                telemetry.clone(),
                source,
                settings.clone(),
                event_tx.clone(),
                shutdown.clone(),
            ))
        })
        .collect()
}

/// Position in a source stream. Records sharing the newest timestamp are
/// counted so later arrivals at that same millisecond are still picked up.
#[derive(Debug, Default)]
struct PollCursor {
    last_ms: Option<u64>,
    seen_at_last: usize,
}

impl PollCursor {
    fn range_start(&self) -> Option<u64> {
        self.last_ms
    }

    /// Drops records already ingested and advances past the rest.
    fn advance(&mut self, records: Vec<Record>) -> Vec<Record> {
        let mut skip = self.seen_at_last;
        let fresh: Vec<Record> = records
            .into_iter()
            .filter(|record| {
                if Some(record.timestamp_ms) == self.last_ms && skip > 0 {
                    skip -= 1;
                    return false;
                }
                true
            })
            .collect();
        if let Some(newest) = fresh.iter().map(|record| record.timestamp_ms).max() {
            let at_newest = fresh
                .iter()
                .filter(|record| record.timestamp_ms == newest)
                .count();
            if Some(newest) == self.last_ms {
                self.seen_at_last += at_newest;
            } else {
                self.last_ms = Some(newest);
                self.seen_at_last = at_newest;
            }
        }
        fresh
    }
}

async fn poll_source(
    store: Arc<dyn RecordStore>,
    telemetry: Telemetry,
    source: String,
    settings: PollSettings,
    event_tx: broadcast::Sender<ConsoleEvent>,
    shutdown: CancellationToken,
) {
    let mut cursor = PollCursor::default();
    loop {
        let query = RecordQuery {
            range_start_ms: cursor.range_start(),
            range_end_ms: None,
            take: Some(settings.take),
        };
        match store.list_records(&source, query).await {
            Ok(records) => {
                if records.len() == settings.take {
                    debug!(
                        event = "telemetry.poll.saturated",
                        source = %source,
                        take = settings.take,
                        since_ms = ?cursor.range_start(),
                        "poll returned a full page; older new records may be skipped"
                    );
                }
                let records = cursor.advance(records);
                if let Some(station) = telemetry.ingest(&source, records).await {
                    let _ = event_tx.send(ConsoleEvent::StationUpdated { station });
                }
            }
            Err(err) => {
                warn!(
                    event = "telemetry.poll.failed",
                    source = %source,
                    error = %err,
                    "telemetry poll failed"
                );
            }
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(settings.interval) => {}
        }
    }
    debug!(event = "telemetry.poller.stopped", source = %source, "telemetry poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use mission_protocol::station::{FIRING_STATION_SOURCE, GPS_SOURCE};
    use record_store::{MemoryStore, StoreScope};
    use serde_json::json;

    fn station_record(tank_psi: f64) -> serde_json::Value {
        json!({
            "op_state": {"state": "fill"},
            "relays": {"fill": true, "vent": true},
            "pressures_psi": {"tank": tank_psi}
        })
    }

    fn record(timestamp_ms: u64, n: u64) -> Record {
        Record {
            source: GPS_SOURCE.to_string(),
            timestamp_ms,
            data: json!({"n": n}),
        }
    }

    #[test]
    fn cursor_picks_up_late_records_at_the_same_millisecond() {
        let mut cursor = PollCursor::default();
        assert_eq!(cursor.range_start(), None);
        let fresh = cursor.advance(vec![record(5, 1), record(7, 2)]);
        assert_eq!(fresh.len(), 2);
        assert_eq!(cursor.range_start(), Some(7));

        // Same page again plus one late arrival stamped 7.
        let fresh = cursor.advance(vec![record(7, 2), record(7, 3)]);
        assert_eq!(fresh, vec![record(7, 3)]);

        let fresh = cursor.advance(vec![record(7, 2), record(7, 3), record(9, 4)]);
        assert_eq!(fresh, vec![record(9, 4)]);
        assert_eq!(cursor.range_start(), Some(9));
        assert!(cursor.advance(vec![record(9, 4)]).is_empty());
    }

    #[tokio::test]
    async fn ingest_keeps_station_mirror_and_counts_drops() {
        let telemetry = Telemetry::new(8);
        let records = vec![
            Record {
                source: FIRING_STATION_SOURCE.to_string(),
                timestamp_ms: 10,
                data: station_record(100.0),
            },
            Record {
                source: FIRING_STATION_SOURCE.to_string(),
                timestamp_ms: 20,
                data: json!({"op_state": "nonsense"}),
            },
        ];
        let station = telemetry
            .ingest(FIRING_STATION_SOURCE, records)
            .await
            .expect("station");
        assert_eq!(station.pressures_psi.get("tank"), Some(&100.0));
        assert_eq!(telemetry.dropped().await, 1);
        assert_eq!(
            telemetry
                .range("station.pressure.tank", None, None)
                .await
                .len(),
            1
        );
        assert!(telemetry.station().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn poller_reads_only_new_records() {
        let memory = MemoryStore::new(StoreScope::new("pad-a", None));
        memory
            .create_record(FIRING_STATION_SOURCE, station_record(10.0), Some(1_000))
            .await
            .expect("record");
        memory
            .create_record(
                GPS_SOURCE,
                json!({"latitude": 1.0, "longitude": 2.0, "altitude_m": 3.0}),
                Some(1_000),
            )
            .await
            .expect("record");

        let telemetry = Telemetry::new(8);
        let (event_tx, mut events) = broadcast::channel(16);
        let shutdown = CancellationToken::new();
        let handles = spawn_pollers(
            Arc::new(memory.clone()),
            telemetry.clone(),
            vec![FIRING_STATION_SOURCE.to_string(), GPS_SOURCE.to_string()],
            PollSettings {
                interval: Duration::from_millis(1_000),
                take: 10,
            },
            event_tx,
            shutdown.clone(),
        );

        let first = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event timeout")
            .expect("event");
        assert!(matches!(first, ConsoleEvent::StationUpdated { .. }));

        memory
            .create_record(FIRING_STATION_SOURCE, station_record(20.0), Some(2_000))
            .await
            .expect("record");
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let tank = telemetry.range("station.pressure.tank", None, None).await;
        let values: Vec<f64> = tank.iter().map(|sample| sample.value).collect();
        assert_eq!(values, vec![10.0, 20.0]);
        assert_eq!(
            telemetry.latest().await.get("gps.altitude_m").map(|sample| sample.value),
            Some(3.0)
        );

        shutdown.cancel();
        for handle in handles {
            handle.await.expect("poller");
        }
    }
}
