//! Transport-independent update/read logic shared by HTTP and gRPC.
//!
//! Every write goes through the same steps: apply to the repository,
//! persist when immediate durability is on, then read the stored values
//! back so callers see the post-merge state (the running sum for
//! counters, not the delta they sent). Each step retries transient
//! storage failures under the configured [`RetryPolicy`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use pulse_core::{Metric, MetricError, MetricKind, RetryPolicy, retry};
use pulse_store::{Persistence, Repository, Storage, StoreError, StoreResult};
use thiserror::Error;
use tracing::{debug, error};

/// Upper bound on a liveness probe of the backend.
pub const PING_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request itself is wrong; never retried.
    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => ServiceError::NotFound(e.to_string()),
            StoreError::Invalid(_) => ServiceError::Invalid(e.to_string()),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<MetricError> for ServiceError {
    fn from(e: MetricError) -> Self {
        ServiceError::Invalid(e.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Metric ingestion and lookup over a [`Storage`].
#[derive(Clone)]
pub struct MetricsService {
    storage: Arc<Storage>,
    persistence: Arc<Persistence>,
    retry: RetryPolicy,
}

impl MetricsService {
    pub fn new(persistence: Arc<Persistence>, retry: RetryPolicy) -> Self {
        Self {
            storage: Arc::clone(persistence.storage()),
            persistence,
            retry,
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    async fn with_retry<T>(&self, op: impl Fn() -> StoreResult<T>) -> ServiceResult<T> {
        retry(self.retry, StoreError::is_transient, || async { op() })
            .await
            .map_err(|e| {
                if e.is_transient() {
                    error!(error = %e, attempts = self.retry.max_attempts(), "storage retries exhausted");
                }
                ServiceError::from(e)
            })
    }

    /// Apply the metrics, then make them durable if immediate mode is on.
    ///
    /// A persistence failure is reported even though the repository has
    /// already been updated.
    async fn apply(&self, metrics: &[Metric]) -> ServiceResult<()> {
        match metrics {
            [one] => self.with_retry(|| self.storage.update_one(one)).await?,
            many => self.with_retry(|| self.storage.update_batch(many)).await?,
        }
        if self.persistence.is_immediate() {
            self.with_retry(|| self.persistence.persist(metrics)).await?;
        }
        Ok(())
    }

    /// Current stored value of one metric.
    pub async fn value(&self, kind: MetricKind, id: &str) -> ServiceResult<Metric> {
        self.with_retry(|| self.storage.get(kind, id)).await
    }

    /// Merge a single update and return the stored result.
    pub async fn update(&self, metric: Metric) -> ServiceResult<Metric> {
        self.apply(std::slice::from_ref(&metric)).await?;
        let stored = self.value(metric.kind(), &metric.id).await?;
        debug!(kind = %stored.kind(), id = %stored.id, value = %stored.value, "metric stored");
        Ok(stored)
    }

    /// Merge a batch atomically and return one stored metric per distinct
    /// `(kind, id)`, in order of first appearance.
    pub async fn update_batch(&self, metrics: Vec<Metric>) -> ServiceResult<Vec<Metric>> {
        if metrics.is_empty() {
            return Err(ServiceError::Invalid("empty metric batch".into()));
        }
        self.apply(&metrics).await?;

        let mut seen = HashSet::new();
        let mut stored = Vec::new();
        for metric in &metrics {
            if seen.insert((metric.kind(), metric.id.as_str())) {
                stored.push(self.value(metric.kind(), &metric.id).await?);
            }
        }
        debug!(received = metrics.len(), stored = stored.len(), "metric batch stored");
        Ok(stored)
    }

    pub async fn list_all(&self) -> ServiceResult<Vec<Metric>> {
        self.with_retry(|| self.storage.list_all()).await
    }

    /// Liveness probe, bounded by [`PING_TIMEOUT`].
    pub async fn ping(&self) -> ServiceResult<()> {
        let storage = Arc::clone(&self.storage);
        let probe = tokio::task::spawn_blocking(move || storage.ping());
        match tokio::time::timeout(PING_TIMEOUT, probe).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(join)) => Err(ServiceError::Internal(format!("ping task failed: {join}"))),
            Err(_) => Err(ServiceError::Internal(format!(
                "storage did not answer within {}ms",
                PING_TIMEOUT.as_millis()
            ))),
        }
    }
}
