use mission_protocol::control::SignalSample;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Fixed-capacity FIFO of samples for one signal.
#[derive(Debug, Clone)]
pub(crate) struct RingBuffer {
    capacity: usize,
    samples: VecDeque<SignalSample>,
}

impl RingBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, sample: SignalSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub(crate) fn latest(&self) -> Option<SignalSample> {
        self.samples.back().copied()
    }

    /// Samples with `start <= timestamp <= end`, in insertion order.
    pub(crate) fn range(&self, start: Option<u64>, end: Option<u64>) -> Vec<SignalSample> {
        self.samples
            .iter()
            .filter(|sample| start.map_or(true, |start| sample.timestamp_ms >= start))
            .filter(|sample| end.map_or(true, |end| sample.timestamp_ms <= end))
            .copied()
            .collect()
    }
}

/// Independent ring buffers keyed by signal name.
#[derive(Debug, Clone)]
pub(crate) struct SignalStore {
    capacity: usize,
    signals: HashMap<String, RingBuffer>,
}

impl SignalStore {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            signals: HashMap::new(),
        }
    }

    pub(crate) fn append(&mut self, signal: &str, sample: SignalSample) {
        if let Some(buffer) = self.signals.get_mut(signal) {
            buffer.push(sample);
            return;
        }
        let mut buffer = RingBuffer::new(self.capacity);
        buffer.push(sample);
        self.signals.insert(signal.to_string(), buffer);
    }

    pub(crate) fn range(&self, signal: &str, start: Option<u64>, end: Option<u64>) -> Vec<SignalSample> {
        self.signals
            .get(signal)
            .map(|buffer| buffer.range(start, end))
            .unwrap_or_default()
    }

    pub(crate) fn latest(&self, signal: &str) -> Option<SignalSample> {
        self.signals.get(signal).and_then(RingBuffer::latest)
    }

    pub(crate) fn latest_all(&self) -> BTreeMap<String, SignalSample> {
        self.signals
            .iter()
            .filter_map(|(name, buffer)| buffer.latest().map(|sample| (name.clone(), sample)))
            .collect()
    }
}

/// Difference between the latest samples of two pressure signals.
///
/// `None` when either signal is empty or their samples are more than
/// `tolerance_ms` apart.
pub(crate) fn pressure_delta(
    store: &SignalStore,
    upstream: &str,
    downstream: &str,
    tolerance_ms: u64,
) -> Option<f64> {
    let upstream = store.latest(upstream)?;
    let downstream = store.latest(downstream)?;
    if upstream.timestamp_ms.abs_diff(downstream.timestamp_ms) > tolerance_ms {
        return None;
    }
    Some(upstream.value - downstream.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp_ms: u64, value: f64) -> SignalSample {
        SignalSample {
            timestamp_ms,
            value,
        }
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut store = SignalStore::new(3);
        for step in 0..5u64 {
            store.append("station.pressure.tank", sample(step * 100, step as f64));
        }
        let kept: Vec<u64> = store
            .range("station.pressure.tank", None, None)
            .iter()
            .map(|sample| sample.timestamp_ms)
            .collect();
        assert_eq!(kept, vec![200, 300, 400]);
        assert_eq!(
            store.latest("station.pressure.tank"),
            Some(sample(400, 4.0))
        );
    }

    #[test]
    fn range_is_inclusive_and_signals_are_independent() {
        let mut store = SignalStore::new(10);
        store.append("gps.altitude_m", sample(10, 1.0));
        store.append("gps.altitude_m", sample(20, 2.0));
        store.append("gps.altitude_m", sample(30, 3.0));
        store.append("load_cell.thrust", sample(25, 9.0));

        let window = store.range("gps.altitude_m", Some(20), Some(30));
        assert_eq!(window, vec![sample(20, 2.0), sample(30, 3.0)]);
        assert!(store.range("missing", None, None).is_empty());
        assert_eq!(store.latest("missing"), None);

        let latest = store.latest_all();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest.get("load_cell.thrust"), Some(&sample(25, 9.0)));
    }

    #[test]
    fn pressure_delta_requires_close_samples() {
        let mut store = SignalStore::new(4);
        assert_eq!(pressure_delta(&store, "tank", "line", 500), None);
        store.append("tank", sample(1_000, 750.0));
        store.append("line", sample(1_200, 700.0));
        assert_eq!(pressure_delta(&store, "tank", "line", 500), Some(50.0));
        store.append("line", sample(2_000, 690.0));
        assert_eq!(pressure_delta(&store, "tank", "line", 500), None);
    }
}
