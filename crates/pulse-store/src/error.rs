//! Error types for the metric repository.

use std::io::ErrorKind;

use pulse_core::{MetricError, MetricKind};
use thiserror::Error;

/// Result type alias for repository operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during repository operations.
///
/// Only [`StoreError::Unavailable`] is transient; callers may retry it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metric not found: {kind}/{id}")]
    NotFound { kind: MetricKind, id: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("invalid metric: {0}")]
    Invalid(#[from] MetricError),

    #[error("unsupported database DSN: {0:?}")]
    UnsupportedDsn(String),

    #[error("storage error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(kind: MetricKind, id: &str) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether the failure is expected to clear up on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Classify an I/O error: temporary unavailability is transient,
    /// everything else is a hard backend failure.
    pub fn from_io(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::PermissionDenied
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
            | ErrorKind::ResourceBusy => StoreError::Unavailable(e.to_string()),
            _ => StoreError::Backend(e.to_string()),
        }
    }
}
