//! Metric sink — the seam to downstream historical storage.
//!
//! The aggregator appends scalar observations here and reads back
//! day-over-day deltas; what the sink does with them (SQLite, Parquet,
//! nothing) is the storage collaborator's business, not the core's.

use std::collections::HashMap;
use std::sync::Mutex;

pub trait MetricSink: Send + Sync {
    /// Record one observation for a named metric.
    fn append(&self, name: &str, value: f64);

    /// Most recent observation, if any.
    fn latest(&self, name: &str) -> Option<f64>;

    /// Change of the latest observation against the most recent *different*
    /// value. Sources that republish unchanged numbers for days would
    /// otherwise report a delta of zero forever.
    ///
    /// `None` with fewer than two observations; `0.0` when every prior
    /// observation equals the latest.
    fn delta(&self, name: &str) -> Option<f64>;
}

/// In-memory sink used in tests and as the default wiring.
#[derive(Debug, Default)]
pub struct MemorySink {
    series: Mutex<HashMap<String, Vec<f64>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricSink for MemorySink {
    fn append(&self, name: &str, value: f64) {
        if !value.is_finite() {
            return;
        }
        let mut series = self.series.lock().unwrap();
        series.entry(name.to_string()).or_default().push(value);
    }

    fn latest(&self, name: &str) -> Option<f64> {
        let series = self.series.lock().unwrap();
        series.get(name).and_then(|v| v.last().copied())
    }

    fn delta(&self, name: &str) -> Option<f64> {
        let series = self.series.lock().unwrap();
        let values = series.get(name)?;
        if values.len() < 2 {
            return None;
        }
        let current = *values.last().unwrap();
        for prev in values.iter().rev().skip(1) {
            if *prev != current {
                return Some(current - prev);
            }
        }
        Some(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_needs_two_observations() {
        let sink = MemorySink::new();
        assert_eq!(sink.delta("oi"), None);
        sink.append("oi", 100.0);
        assert_eq!(sink.delta("oi"), None);
    }

    #[test]
    fn delta_skips_repeated_values() {
        let sink = MemorySink::new();
        sink.append("oi", 100.0);
        sink.append("oi", 120.0);
        sink.append("oi", 120.0);
        // 120 repeated; compare against the last different value (100).
        assert_eq!(sink.delta("oi"), Some(20.0));
    }

    #[test]
    fn delta_zero_when_all_equal() {
        let sink = MemorySink::new();
        sink.append("oi", 5.0);
        sink.append("oi", 5.0);
        assert_eq!(sink.delta("oi"), Some(0.0));
    }

    #[test]
    fn latest_returns_most_recent() {
        let sink = MemorySink::new();
        sink.append("price", 49.5);
        sink.append("price", 50.25);
        assert_eq!(sink.latest("price"), Some(50.25));
        assert_eq!(sink.latest("missing"), None);
    }

    #[test]
    fn non_finite_values_ignored() {
        let sink = MemorySink::new();
        sink.append("x", f64::NAN);
        assert_eq!(sink.latest("x"), None);
    }
}
