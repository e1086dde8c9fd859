//! The backend-agnostic repository contract.

use pulse_core::{Metric, MetricKind};

use crate::error::StoreResult;

/// Storage of the current value of every metric.
///
/// Gauges and counters live in separate key-spaces, so a gauge `x` and a
/// counter `x` never collide. Implementations must be safe to share
/// between threads.
pub trait Repository: Send + Sync {
    /// Merge one metric into the stored state (gauge: overwrite, counter: add).
    fn update_one(&self, metric: &Metric) -> StoreResult<()>;

    /// Merge a list of metrics atomically: either all are applied or none.
    fn update_batch(&self, metrics: &[Metric]) -> StoreResult<()>;

    /// Current value of one metric; `StoreError::NotFound` if absent.
    fn get(&self, kind: MetricKind, id: &str) -> StoreResult<Metric>;

    /// All metrics of one kind, sorted by id.
    fn list(&self, kind: MetricKind) -> StoreResult<Vec<Metric>>;

    /// All metrics: gauges first, then counters, each sorted by id.
    fn list_all(&self) -> StoreResult<Vec<Metric>> {
        let mut all = Vec::new();
        for kind in MetricKind::ALL {
            all.extend(self.list(kind)?);
        }
        Ok(all)
    }

    /// Remove one metric; `StoreError::NotFound` if absent.
    fn delete(&self, kind: MetricKind, id: &str) -> StoreResult<()>;

    /// Liveness probe.
    fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
