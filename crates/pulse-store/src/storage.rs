//! Backend selection.

use std::path::PathBuf;

use pulse_core::{Metric, MetricKind};
use tracing::info;

use crate::database::DbStorage;
use crate::error::StoreResult;
use crate::file::FileStorage;
use crate::memory::MemStorage;
use crate::repository::Repository;

/// Which backend to open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageConfig {
    /// Transactional database DSN; wins over everything else.
    pub dsn: Option<String>,
    /// Snapshot file for the file-backed repository.
    pub snapshot: Option<PathBuf>,
}

/// The repository chosen at startup.
pub enum Storage {
    Memory(MemStorage),
    File(FileStorage),
    Database(DbStorage),
}

/// Open a repository: DSN present → database; else snapshot path present
/// → file-backed; else in-memory.
pub fn open_storage(config: &StorageConfig) -> StoreResult<Storage> {
    let storage = if let Some(dsn) = config.dsn.as_deref().filter(|d| !d.is_empty()) {
        Storage::Database(DbStorage::from_dsn(dsn)?)
    } else if let Some(path) = config
        .snapshot
        .as_ref()
        .filter(|p| !p.as_os_str().is_empty())
    {
        Storage::File(FileStorage::new(path.clone()))
    } else {
        Storage::Memory(MemStorage::new())
    };
    info!(backend = storage.backend_name(), "metric storage opened");
    Ok(storage)
}

impl Storage {
    pub fn backend_name(&self) -> &'static str {
        match self {
            Storage::Memory(_) => "memory",
            Storage::File(_) => "file",
            Storage::Database(_) => "database",
        }
    }

    /// The file-backed repository, if that is the active backend.
    pub fn as_file(&self) -> Option<&FileStorage> {
        match self {
            Storage::File(file) => Some(file),
            _ => None,
        }
    }

    fn repo(&self) -> &dyn Repository {
        match self {
            Storage::Memory(s) => s,
            Storage::File(s) => s,
            Storage::Database(s) => s,
        }
    }
}

impl Repository for Storage {
    fn update_one(&self, metric: &Metric) -> StoreResult<()> {
        self.repo().update_one(metric)
    }

    fn update_batch(&self, metrics: &[Metric]) -> StoreResult<()> {
        self.repo().update_batch(metrics)
    }

    fn get(&self, kind: MetricKind, id: &str) -> StoreResult<Metric> {
        self.repo().get(kind, id)
    }

    fn list(&self, kind: MetricKind) -> StoreResult<Vec<Metric>> {
        self.repo().list(kind)
    }

    fn list_all(&self) -> StoreResult<Vec<Metric>> {
        self.repo().list_all()
    }

    fn delete(&self, kind: MetricKind, id: &str) -> StoreResult<()> {
        self.repo().delete(kind, id)
    }

    fn ping(&self) -> StoreResult<()> {
        self.repo().ping()
    }
}
