//! In-memory repository.
//!
//! Both key-spaces sit behind a single `RwLock`. Batches hold the write
//! lock for their whole duration and are staged before being applied, so
//! a failing item leaves the stored state untouched.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use pulse_core::{Metric, MetricKind, MetricValue};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::repository::Repository;

#[derive(Debug, Default)]
struct Maps {
    gauges: HashMap<String, f64>,
    counters: HashMap<String, i64>,
}

impl Maps {
    fn get(&self, kind: MetricKind, id: &str) -> Option<Metric> {
        match kind {
            MetricKind::Gauge => self.gauges.get(id).map(|v| Metric::gauge(id, *v)),
            MetricKind::Counter => self.counters.get(id).map(|v| Metric::counter(id, *v)),
        }
    }

    fn set(&mut self, metric: Metric) {
        match metric.value {
            MetricValue::Gauge(v) => {
                self.gauges.insert(metric.id, v);
            }
            MetricValue::Counter(v) => {
                self.counters.insert(metric.id, v);
            }
        }
    }

    /// New stored value for `incoming`, without applying it.
    fn merged(&self, incoming: &Metric) -> StoreResult<Metric> {
        match self.get(incoming.kind(), &incoming.id) {
            Some(current) => Ok(current.merge(incoming)?),
            None => Ok(incoming.clone()),
        }
    }
}

/// Thread-safe in-memory metric storage.
#[derive(Debug, Default)]
pub struct MemStorage {
    maps: RwLock<Maps>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the maps half-updated:
    // every mutation is a single insert after all validation.
    fn read(&self) -> RwLockReadGuard<'_, Maps> {
        self.maps.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Maps> {
        self.maps.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored metrics across both kinds.
    pub fn len(&self) -> usize {
        let maps = self.read();
        maps.gauges.len() + maps.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Repository for MemStorage {
    fn update_one(&self, metric: &Metric) -> StoreResult<()> {
        let mut maps = self.write();
        let merged = maps.merged(metric)?;
        maps.set(merged);
        debug!(kind = %metric.kind(), id = %metric.id, "metric updated");
        Ok(())
    }

    fn update_batch(&self, metrics: &[Metric]) -> StoreResult<()> {
        let mut maps = self.write();
        // Stage every merge first; a later item may build on an earlier one.
        let mut staged: HashMap<(MetricKind, &str), Metric> = HashMap::new();
        for metric in metrics {
            let key = (metric.kind(), metric.id.as_str());
            let merged = match staged.get(&key) {
                Some(current) => current.merge(metric)?,
                None => maps.merged(metric)?,
            };
            staged.insert(key, merged);
        }
        let count = staged.len();
        for (_, metric) in staged {
            maps.set(metric);
        }
        debug!(count, "metric batch applied");
        Ok(())
    }

    fn get(&self, kind: MetricKind, id: &str) -> StoreResult<Metric> {
        self.read()
            .get(kind, id)
            .ok_or_else(|| StoreError::not_found(kind, id))
    }

    fn list(&self, kind: MetricKind) -> StoreResult<Vec<Metric>> {
        let maps = self.read();
        let mut metrics: Vec<Metric> = match kind {
            MetricKind::Gauge => maps
                .gauges
                .iter()
                .map(|(id, v)| Metric::gauge(id.clone(), *v))
                .collect(),
            MetricKind::Counter => maps
                .counters
                .iter()
                .map(|(id, v)| Metric::counter(id.clone(), *v))
                .collect(),
        };
        metrics.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(metrics)
    }

    fn delete(&self, kind: MetricKind, id: &str) -> StoreResult<()> {
        let mut maps = self.write();
        let existed = match kind {
            MetricKind::Gauge => maps.gauges.remove(id).is_some(),
            MetricKind::Counter => maps.counters.remove(id).is_some(),
        };
        if existed {
            Ok(())
        } else {
            Err(StoreError::not_found(kind, id))
        }
    }
}
