//! Snapshot durability on top of a [`Storage`].
//!
//! Only the file-backed repository has a snapshot to manage; the database
//! backend is durable by construction and the in-memory backend has no
//! durability at all. For those, every operation here is a no-op.

use std::sync::Arc;
use std::time::Duration;

use pulse_core::{Metric, RetryPolicy, retry};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::{StoreError, StoreResult};
use crate::storage::Storage;

/// When snapshot writes happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// No snapshot to maintain.
    None,
    /// Every successful write is followed by a snapshot upsert.
    Immediate,
    /// The whole repository is dumped on a timer and on shutdown.
    Deferred(Duration),
}

pub struct Persistence {
    storage: Arc<Storage>,
    mode: DurabilityMode,
}

impl Persistence {
    /// Derive the mode from the backend and the flush interval
    /// (zero = immediate).
    pub fn new(storage: Arc<Storage>, interval: Duration) -> Self {
        let mode = match (storage.as_file(), interval.is_zero()) {
            (None, _) => DurabilityMode::None,
            (Some(_), true) => DurabilityMode::Immediate,
            (Some(_), false) => DurabilityMode::Deferred(interval),
        };
        debug!(?mode, backend = storage.backend_name(), "persistence configured");
        Self { storage, mode }
    }

    pub fn mode(&self) -> DurabilityMode {
        self.mode
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn is_immediate(&self) -> bool {
        self.mode == DurabilityMode::Immediate
    }

    /// Make the given metrics durable right away (immediate mode only).
    pub fn persist(&self, metrics: &[Metric]) -> StoreResult<()> {
        match (self.mode, self.storage.as_file()) {
            (DurabilityMode::Immediate, Some(file)) => file.dump(metrics),
            _ => Ok(()),
        }
    }

    /// Write a full snapshot now, whatever the mode.
    pub fn flush(&self) -> StoreResult<()> {
        match self.storage.as_file() {
            Some(file) => {
                file.full_dump()?;
                info!(path = %file.path().display(), "snapshot flushed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Deferred-mode flush loop. Returns once `shutdown` fires, after a
    /// final synchronous flush whose result is returned. In other modes it
    /// returns immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> StoreResult<()> {
        let DurabilityMode::Deferred(period) = self.mode else {
            return Ok(());
        };
        info!(interval_secs = period.as_secs(), "snapshot loop started");

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.flush() {
                        error!(error = %e, "periodic snapshot failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("snapshot loop shutting down, flushing");
                    return self.flush();
                }
            }
        }
    }

    /// Seed the repository from the snapshot at startup.
    ///
    /// Transient open failures are retried under `policy`. A corrupt
    /// snapshot is returned as an error and should abort startup; any other
    /// failure is logged and startup continues with an empty repository.
    pub async fn restore(&self, policy: RetryPolicy) -> StoreResult<usize> {
        let Some(file) = self.storage.as_file() else {
            return Ok(0);
        };
        load_or_start_empty(policy, &file.path().display().to_string(), || file.load()).await
    }
}

async fn load_or_start_empty(
    policy: RetryPolicy,
    path: &str,
    load: impl Fn() -> StoreResult<usize>,
) -> StoreResult<usize> {
    match retry(policy, StoreError::is_transient, || async { load() }).await {
        Ok(count) => Ok(count),
        Err(e @ StoreError::Corrupt(_)) => {
            error!(path, error = %e, "snapshot is corrupt, refusing to start");
            Err(e)
        }
        Err(e) => {
            error!(
                path,
                error = %e,
                attempts = policy.max_attempts(),
                "snapshot unreadable, starting with empty state"
            );
            Ok(0)
        }
    }
}
