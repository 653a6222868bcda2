//! Named-event latency recording.
//!
//! Some operations time themselves as a unit (a read-modify-write measures
//! the read and the write together), which the per-operation latency
//! tracking in the bench module cannot see. Those composite timings are
//! reported here, to a sink shared by all workers.

use hashbrown::HashMap;
use hdrhistogram::Histogram;
use parking_lot::Mutex;

/// The event name under which a read-modify-write reports the combined
/// duration of its read and its update.
pub const READ_MODIFY_WRITE_EVENT: &str = "READ-MODIFY-WRITE";

/// Receives named, timed events from the workload engine. Fire-and-forget:
/// implementations must not fail and must be callable from any worker.
pub trait MeasurementSink: Send + Sync {
    fn record(&self, event: &str, micros: u64);
}

/// Discards everything. The default sink when nobody asked for measurements.
pub struct NullSink;

impl MeasurementSink for NullSink {
    fn record(&self, _event: &str, _micros: u64) {}
}

/// Collects one latency histogram per event name. The mutex is only
/// contended between workers reporting composite events, which are a small
/// share of all operations.
pub struct LatencyRecorder {
    events: Mutex<HashMap<String, Histogram<u64>>>,
}

impl LatencyRecorder {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// One summary line per recorded event, in the same plain-text shape as
    /// the per-phase latency output.
    pub fn summaries(&self) -> Vec<String> {
        let events = self.events.lock();
        let mut names: Vec<&String> = events.keys().collect();
        names.sort();
        names
            .iter()
            .map(|name| {
                let hdr = &events[*name];
                format!(
                    "event {} count {} min_us {} max_us {} avg_us {:.2} p95_us {} p99_us {}",
                    name,
                    hdr.len(),
                    hdr.min(),
                    hdr.max(),
                    hdr.mean(),
                    hdr.value_at_quantile(0.95),
                    hdr.value_at_quantile(0.99),
                )
            })
            .collect()
    }
}

impl Default for LatencyRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MeasurementSink for LatencyRecorder {
    fn record(&self, event: &str, micros: u64) {
        let mut events = self.events.lock();
        let hdr = events
            .entry_ref(event)
            .or_insert_with(|| Histogram::new(3).unwrap());
        assert!(hdr.record(micros.max(1)).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_accepts_anything() {
        let sink = NullSink;
        sink.record("whatever", 0);
        sink.record("whatever", u64::MAX);
    }

    #[test]
    fn recorder_groups_by_event() {
        let recorder = LatencyRecorder::new();
        assert!(recorder.is_empty());
        for us in [10, 20, 30] {
            recorder.record(READ_MODIFY_WRITE_EVENT, us);
        }
        recorder.record("other", 5);
        assert!(!recorder.is_empty());
        let summaries = recorder.summaries();
        assert_eq!(summaries.len(), 2);
        assert!(summaries[0].starts_with("event READ-MODIFY-WRITE count 3"));
        assert!(summaries[1].starts_with("event other count 1"));
    }
}
