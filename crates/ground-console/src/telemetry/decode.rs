use mission_protocol::station::{
    GpsRecord, LoadCellRecord, StationRecord, ThermocoupleRecord, FIRING_STATION_SOURCE,
    GPS_SOURCE, LOAD_CELL_SOURCE, THERMOCOUPLE_SOURCE,
};
use serde_json::Value;

/// A device record decoded into named numeric signals.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Decoded {
    pub(crate) signals: Vec<(String, f64)>,
    pub(crate) station: Option<StationRecord>,
}

/// Flattens one record of `source` into signals. Unknown sources contribute
/// their top-level numeric fields as `{source}.{field}`.
pub(crate) fn decode_record(source: &str, data: Value) -> Result<Decoded, serde_json::Error> {
    let decoded = match source {
        FIRING_STATION_SOURCE => {
            let record: StationRecord = serde_json::from_value(data)?;
            let mut signals: Vec<(String, f64)> = record
                .relays
                .named()
                .iter()
                .map(|(relay, on)| (format!("station.relay.{relay}"), if *on { 1.0 } else { 0.0 }))
                .collect();
            signals.extend(
                record
                    .pressures_psi
                    .iter()
                    .map(|(name, value)| (format!("station.pressure.{name}"), *value)),
            );
            signals.extend(
                record
                    .temperatures_c
                    .iter()
                    .map(|(name, value)| (format!("station.temperature.{name}"), *value)),
            );
            Decoded {
                signals,
                station: Some(record),
            }
        }
        GPS_SOURCE => {
            let record: GpsRecord = serde_json::from_value(data)?;
            let mut signals = vec![
                ("gps.latitude".to_string(), record.latitude),
                ("gps.longitude".to_string(), record.longitude),
                ("gps.altitude_m".to_string(), record.altitude_m),
            ];
            if let Some(satellites) = record.satellites {
                signals.push(("gps.satellites".to_string(), f64::from(satellites)));
            }
            Decoded {
                signals,
                station: None,
            }
        }
        LOAD_CELL_SOURCE => {
            let record: LoadCellRecord = serde_json::from_value(data)?;
            Decoded {
                signals: record
                    .cells_n
                    .into_iter()
                    .map(|(cell, value)| (format!("load_cell.{cell}"), value))
                    .collect(),
                station: None,
            }
        }
        THERMOCOUPLE_SOURCE => {
            let record: ThermocoupleRecord = serde_json::from_value(data)?;
            Decoded {
                signals: record
                    .probes_c
                    .into_iter()
                    .map(|(probe, value)| (format!("thermocouple.{probe}"), value))
                    .collect(),
                station: None,
            }
        }
        other => {
            let fields: serde_json::Map<String, Value> = serde_json::from_value(data)?;
            Decoded {
                signals: fields
                    .into_iter()
                    .filter_map(|(field, value)| {
                        value.as_f64().map(|value| (format!("{other}.{field}"), value))
                    })
                    .collect(),
                station: None,
            }
        }
    };
    Ok(decoded)
}
