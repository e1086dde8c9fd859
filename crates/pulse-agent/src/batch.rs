//! Metrics accumulated between report waves.

use std::collections::HashMap;

use pulse_core::{Metric, MetricKind};
use tracing::warn;

/// Pending updates, one entry per `(kind, id)` in first-seen order.
/// Gauges keep the latest reading; counter deltas are summed.
#[derive(Debug, Default)]
pub struct PendingBatch {
    entries: Vec<Metric>,
    index: HashMap<(MetricKind, String), usize>,
}

impl PendingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, metric: Metric) {
        let key = (metric.kind(), metric.id.clone());
        match self.index.get(&key) {
            Some(&slot) => match self.entries[slot].merge(&metric) {
                Ok(merged) => self.entries[slot] = merged,
                // Keep what we have; the overflowing delta is lost.
                Err(e) => warn!(id = %metric.id, error = %e, "pending metric not merged"),
            },
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push(metric);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take everything pending, leaving the batch empty.
    pub fn drain(&mut self) -> Vec<Metric> {
        self.index.clear();
        std::mem::take(&mut self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_by_kind_and_id() {
        let mut batch = PendingBatch::new();
        batch.add(Metric::counter("PollCount", 1));
        batch.add(Metric::gauge("Alloc", 1.0));
        batch.add(Metric::counter("PollCount", 1));
        batch.add(Metric::gauge("Alloc", 4.0));
        batch.add(Metric::gauge("PollCount", 0.5));

        assert_eq!(
            batch.drain(),
            vec![
                Metric::counter("PollCount", 2),
                Metric::gauge("Alloc", 4.0),
                Metric::gauge("PollCount", 0.5),
            ]
        );
        assert!(batch.is_empty());
    }

    #[test]
    fn drained_batch_starts_fresh() {
        let mut batch = PendingBatch::new();
        batch.add(Metric::counter("c", 5));
        batch.drain();
        batch.add(Metric::counter("c", 1));
        assert_eq!(batch.drain(), vec![Metric::counter("c", 1)]);
    }

    #[test]
    fn overflowing_delta_keeps_previous_sum() {
        let mut batch = PendingBatch::new();
        batch.add(Metric::counter("c", i64::MAX));
        batch.add(Metric::counter("c", 1));
        assert_eq!(batch.drain(), vec![Metric::counter("c", i64::MAX)]);
    }
}
