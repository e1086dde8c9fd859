//! Transactional repository backed by redb.
//!
//! Every update runs in one write transaction: a batch either commits as a
//! whole or is aborted. Counters are read-modify-written inside that
//! transaction, so no application-level locking is needed; redb
//! serialises writers.
//!
//! Opening the database runs schema migrations up to [`SCHEMA_VERSION`].

use std::path::Path;
use std::sync::Arc;

use pulse_core::{Metric, MetricKind, MetricValue};
use redb::{Database, ReadableDatabase, ReadableTable, Table, WriteTransaction};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::repository::Repository;
use crate::tables::*;

/// Schema version written by this build.
pub const SCHEMA_VERSION: u64 = 1;

/// Map a redb error onto the store taxonomy. I/O failures and a database
/// locked by another process are transient. Only use this for failures
/// that leave nothing committed; commits go through [`classify_commit`].
fn classify(e: impl Into<redb::Error>) -> StoreError {
    match e.into() {
        redb::Error::Io(io) => StoreError::Unavailable(io.to_string()),
        redb::Error::DatabaseAlreadyOpen => {
            StoreError::Unavailable("database is locked by another process".to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

/// A failed commit may still have reached disk, so retrying it could apply
/// counter deltas twice. Never transient.
fn classify_commit(e: redb::CommitError) -> StoreError {
    StoreError::Backend(format!("commit failed: {e}"))
}

/// Thread-safe metric storage backed by a redb database.
#[derive(Clone)]
pub struct DbStorage {
    db: Arc<Database>,
}

impl DbStorage {
    /// Open (or create) a database file and migrate it.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(classify)?;
        let store = Self { db: Arc::new(db) };
        store.migrate()?;
        debug!(?path, "metric database opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(classify)?;
        let store = Self { db: Arc::new(db) };
        store.migrate()?;
        debug!("in-memory metric database opened");
        Ok(store)
    }

    /// Open from a DSN: `redb://<path>`, `redb:<path>`, a path ending in
    /// `.redb`, or `memory:`.
    pub fn from_dsn(dsn: &str) -> StoreResult<Self> {
        let dsn = dsn.trim();
        if dsn == "memory:" {
            return Self::open_in_memory();
        }
        let path = dsn
            .strip_prefix("redb://")
            .or_else(|| dsn.strip_prefix("redb:"))
            .or_else(|| dsn.ends_with(".redb").then_some(dsn))
            .filter(|p| !p.is_empty())
            .ok_or_else(|| StoreError::UnsupportedDsn(dsn.to_string()))?;
        Self::open(Path::new(path))
    }

    /// Bring the schema up to [`SCHEMA_VERSION`].
    fn migrate(&self) -> StoreResult<()> {
        self.write(|txn| {
            let current = {
                let meta = txn.open_table(META).map_err(classify)?;
                meta.get(SCHEMA_VERSION_KEY)
                    .map_err(classify)?
                    .map(|v| v.value())
                    .unwrap_or(0)
            };

            if current > SCHEMA_VERSION {
                return Err(StoreError::Corrupt(format!(
                    "database schema version {current} is newer than supported version {SCHEMA_VERSION}"
                )));
            }
            if current == SCHEMA_VERSION {
                debug!(version = current, "database schema is up to date");
                return Ok(());
            }

            info!(from = current, to = SCHEMA_VERSION, "migrating metric database");
            if current < 1 {
                migrate_to_v1(txn)?;
            }

            let mut meta = txn.open_table(META).map_err(classify)?;
            meta.insert(SCHEMA_VERSION_KEY, SCHEMA_VERSION)
                .map_err(classify)?;
            Ok(())
        })
    }

    /// Run `f` in a write transaction; commit on success, abort on error.
    fn write<T>(&self, f: impl FnOnce(&WriteTransaction) -> StoreResult<T>) -> StoreResult<T> {
        let txn = self.db.begin_write().map_err(classify)?;
        match f(&txn) {
            Ok(value) => {
                txn.commit().map_err(classify_commit)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = txn.abort() {
                    warn!(error = %abort_err, "failed to abort write transaction");
                }
                Err(e)
            }
        }
    }

    /// Schema version recorded in the database.
    pub fn schema_version(&self) -> StoreResult<u64> {
        let txn = self.db.begin_read().map_err(classify)?;
        let meta = txn.open_table(META).map_err(classify)?;
        Ok(meta
            .get(SCHEMA_VERSION_KEY)
            .map_err(classify)?
            .map(|v| v.value())
            .unwrap_or(0))
    }
}

fn migrate_to_v1(txn: &WriteTransaction) -> StoreResult<()> {
    info!("running migration to schema version 1");
    // Opening a table in a write transaction creates it if absent.
    txn.open_table(GAUGES).map_err(classify)?;
    txn.open_table(COUNTERS).map_err(classify)?;
    Ok(())
}

/// Merge one metric into the open tables.
fn apply(
    gauges: &mut Table<'_, &'static str, f64>,
    counters: &mut Table<'_, &'static str, i64>,
    metric: &Metric,
) -> StoreResult<()> {
    match metric.value {
        MetricValue::Gauge(v) => {
            gauges.insert(metric.id.as_str(), v).map_err(classify)?;
        }
        MetricValue::Counter(_) => {
            let current = counters
                .get(metric.id.as_str())
                .map_err(classify)?
                .map(|v| v.value());
            let stored = match current {
                Some(sum) => Metric::counter(metric.id.as_str(), sum).merge(metric)?,
                None => metric.clone(),
            };
            if let MetricValue::Counter(sum) = stored.value {
                counters.insert(metric.id.as_str(), sum).map_err(classify)?;
            }
        }
    }
    Ok(())
}

impl Repository for DbStorage {
    fn update_one(&self, metric: &Metric) -> StoreResult<()> {
        self.update_batch(std::slice::from_ref(metric))
    }

    fn update_batch(&self, metrics: &[Metric]) -> StoreResult<()> {
        self.write(|txn| {
            let mut gauges = txn.open_table(GAUGES).map_err(classify)?;
            let mut counters = txn.open_table(COUNTERS).map_err(classify)?;
            for metric in metrics {
                apply(&mut gauges, &mut counters, metric)?;
            }
            Ok(())
        })?;
        debug!(count = metrics.len(), "metrics committed");
        Ok(())
    }

    fn get(&self, kind: MetricKind, id: &str) -> StoreResult<Metric> {
        let txn = self.db.begin_read().map_err(classify)?;
        let metric = match kind {
            MetricKind::Gauge => {
                let table = txn.open_table(GAUGES).map_err(classify)?;
                let value = table.get(id).map_err(classify)?.map(|v| v.value());
                value.map(|v| Metric::gauge(id, v))
            }
            MetricKind::Counter => {
                let table = txn.open_table(COUNTERS).map_err(classify)?;
                let value = table.get(id).map_err(classify)?.map(|v| v.value());
                value.map(|v| Metric::counter(id, v))
            }
        };
        metric.ok_or_else(|| StoreError::not_found(kind, id))
    }

    fn list(&self, kind: MetricKind) -> StoreResult<Vec<Metric>> {
        let txn = self.db.begin_read().map_err(classify)?;
        let mut results = Vec::new();
        // redb iterates keys in order, so results come out sorted by id.
        match kind {
            MetricKind::Gauge => {
                let table = txn.open_table(GAUGES).map_err(classify)?;
                for entry in table.iter().map_err(classify)? {
                    let (id, value) = entry.map_err(classify)?;
                    results.push(Metric::gauge(id.value(), value.value()));
                }
            }
            MetricKind::Counter => {
                let table = txn.open_table(COUNTERS).map_err(classify)?;
                for entry in table.iter().map_err(classify)? {
                    let (id, value) = entry.map_err(classify)?;
                    results.push(Metric::counter(id.value(), value.value()));
                }
            }
        }
        Ok(results)
    }

    fn delete(&self, kind: MetricKind, id: &str) -> StoreResult<()> {
        self.write(|txn| {
            let existed = match kind {
                MetricKind::Gauge => {
                    let mut table = txn.open_table(GAUGES).map_err(classify)?;
                    table.remove(id).map_err(classify)?.is_some()
                }
                MetricKind::Counter => {
                    let mut table = txn.open_table(COUNTERS).map_err(classify)?;
                    table.remove(id).map_err(classify)?.is_some()
                }
            };
            if existed {
                Ok(())
            } else {
                Err(StoreError::not_found(kind, id))
            }
        })
    }

    fn ping(&self) -> StoreResult<()> {
        let txn = self.db.begin_read().map_err(classify)?;
        txn.open_table(META).map_err(classify)?;
        Ok(())
    }
}
