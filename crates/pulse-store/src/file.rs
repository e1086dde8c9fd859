//! Snapshot-file backed repository.
//!
//! Metric state lives in a [`MemStorage`]; the snapshot file is a
//! durability copy managed through `dump`, `full_dump` and `load`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use pulse_core::{Metric, MetricKind};
use tracing::{debug, info};

use crate::error::StoreResult;
use crate::memory::MemStorage;
use crate::repository::Repository;
use crate::snapshot::{read_snapshot, write_snapshot};

pub struct FileStorage {
    mem: MemStorage,
    path: PathBuf,
    /// Serialises snapshot writers so concurrent dumps do not lose upserts.
    writer: Mutex<()>,
}

impl FileStorage {
    /// Create an empty repository backed by the snapshot at `path`.
    /// Nothing is read until [`FileStorage::load`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            mem: MemStorage::new(),
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Upsert the current in-memory state of `metrics` into the snapshot.
    ///
    /// Other records already in the snapshot are kept. A metric that no
    /// longer exists in memory is removed from the snapshot.
    pub fn dump(&self, metrics: &[Metric]) -> StoreResult<()> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut records: BTreeMap<(MetricKind, String), Metric> = read_snapshot(&self.path)?
            .unwrap_or_default()
            .into_iter()
            .map(|m| ((m.kind(), m.id.clone()), m))
            .collect();

        for metric in metrics {
            let key = (metric.kind(), metric.id.clone());
            match self.mem.get(metric.kind(), &metric.id) {
                Ok(current) => {
                    records.insert(key, current);
                }
                Err(e) if e.is_not_found() => {
                    records.remove(&key);
                }
                Err(e) => return Err(e),
            }
        }

        let records: Vec<Metric> = records.into_values().collect();
        write_snapshot(&self.path, &records)?;
        debug!(path = %self.path.display(), updated = metrics.len(), "snapshot upserted");
        Ok(())
    }

    /// Rewrite the snapshot from the complete in-memory state.
    pub fn full_dump(&self) -> StoreResult<()> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let all = self.mem.list_all()?;
        write_snapshot(&self.path, &all)?;
        debug!(path = %self.path.display(), count = all.len(), "full snapshot written");
        Ok(())
    }

    /// Replay the snapshot into memory. Returns the number of records
    /// replayed; a missing snapshot replays nothing.
    pub fn load(&self) -> StoreResult<usize> {
        let Some(metrics) = read_snapshot(&self.path)? else {
            info!(path = %self.path.display(), "no snapshot found, starting empty");
            return Ok(0);
        };
        for metric in &metrics {
            self.mem.update_one(metric)?;
        }
        info!(path = %self.path.display(), count = metrics.len(), "snapshot loaded");
        Ok(metrics.len())
    }
}

impl Repository for FileStorage {
    fn update_one(&self, metric: &Metric) -> StoreResult<()> {
        self.mem.update_one(metric)
    }

    fn update_batch(&self, metrics: &[Metric]) -> StoreResult<()> {
        self.mem.update_batch(metrics)
    }

    fn get(&self, kind: MetricKind, id: &str) -> StoreResult<Metric> {
        self.mem.get(kind, id)
    }

    fn list(&self, kind: MetricKind) -> StoreResult<Vec<Metric>> {
        self.mem.list(kind)
    }

    fn delete(&self, kind: MetricKind, id: &str) -> StoreResult<()> {
        self.mem.delete(kind, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    fn sample(store: &FileStorage) {
        store
            .update_batch(&[
                Metric::counter("c1", 5),
                Metric::gauge("g1", 9.9),
                Metric::gauge("g2", -1.25),
            ])
            .unwrap();
    }

    #[test]
    fn full_dump_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let original = FileStorage::new(&path);
        sample(&original);
        original.full_dump().unwrap();

        let restored = FileStorage::new(&path);
        assert_eq!(restored.load().unwrap(), 3);
        assert_eq!(restored.list_all().unwrap(), original.list_all().unwrap());
    }

    #[test]
    fn incremental_dumps_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let original = FileStorage::new(&path);
        for m in [
            Metric::counter("c1", 5),
            Metric::gauge("g1", 1.0),
            Metric::counter("c1", 10),
            Metric::gauge("g1", 2.5),
        ] {
            original.update_one(&m).unwrap();
            original.dump(std::slice::from_ref(&m)).unwrap();
        }

        let restored = FileStorage::new(&path);
        restored.load().unwrap();
        assert_eq!(
            restored.list_all().unwrap(),
            vec![Metric::gauge("g1", 2.5), Metric::counter("c1", 15)]
        );
    }

    #[test]
    fn dump_keeps_unrelated_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        write_snapshot(&path, &[Metric::gauge("old", 3.0)]).unwrap();

        let store = FileStorage::new(&path);
        store.update_one(&Metric::counter("new", 1)).unwrap();
        store.dump(&[Metric::counter("new", 1)]).unwrap();

        let on_disk = read_snapshot(&path).unwrap().unwrap();
        assert_eq!(on_disk, vec![Metric::gauge("old", 3.0), Metric::counter("new", 1)]);
    }

    #[test]
    fn dump_drops_deleted_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let store = FileStorage::new(&path);
        store.update_one(&Metric::gauge("g", 1.0)).unwrap();
        store.full_dump().unwrap();

        store.delete(MetricKind::Gauge, "g").unwrap();
        store.dump(&[Metric::gauge("g", 1.0)]).unwrap();
        assert_eq!(read_snapshot(&path).unwrap(), Some(Vec::new()));
    }

    #[test]
    fn load_of_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStorage::new(dir.path().join("none.json"));
        assert_eq!(store.load().unwrap(), 0);
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn load_of_corrupt_snapshot_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ this is not a snapshot").unwrap();
        assert!(matches!(FileStorage::new(&path).load(), Err(StoreError::Corrupt(_))));
    }
}
