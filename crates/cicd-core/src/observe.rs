//! Observability capability.
//!
//! The core publishes counters and timings through this trait; backends live
//! outside the core. Counter names are dotted paths, e.g.
//! `runner.fallback.rate_limited`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub trait Metrics: Send + Sync {
    fn incr(&self, name: &str) {
        self.incr_by(name, 1);
    }
    fn incr_by(&self, name: &str, value: u64);
    fn observe_duration(&self, name: &str, duration: Duration);
}

/// Discards everything. The default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn incr_by(&self, _name: &str, _value: u64) {}
    fn observe_duration(&self, _name: &str, _duration: Duration) {}
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    counters: Mutex<HashMap<String, u64>>,
    durations: Mutex<HashMap<String, Vec<Duration>>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .expect("metrics poisoned")
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn durations(&self, name: &str) -> Vec<Duration> {
        self.durations
            .lock()
            .expect("metrics poisoned")
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

impl Metrics for RecordingMetrics {
    fn incr_by(&self, name: &str, value: u64) {
        *self
            .counters
            .lock()
            .expect("metrics poisoned")
            .entry(name.to_string())
            .or_insert(0) += value;
    }

    fn observe_duration(&self, name: &str, duration: Duration) {
        self.durations
            .lock()
            .expect("metrics poisoned")
            .entry(name.to_string())
            .or_default()
            .push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_metrics_counts() {
        let metrics = RecordingMetrics::new();
        metrics.incr("runner.fallback.timeout");
        metrics.incr_by("runner.fallback.timeout", 2);
        assert_eq!(metrics.counter("runner.fallback.timeout"), 3);
        assert_eq!(metrics.counter("missing"), 0);
    }

    #[test]
    fn recording_metrics_durations() {
        let metrics = RecordingMetrics::new();
        metrics.observe_duration("bootstrap.total", Duration::from_millis(12));
        assert_eq!(metrics.durations("bootstrap.total").len(), 1);
    }
}
