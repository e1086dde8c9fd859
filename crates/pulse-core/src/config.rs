//! Server and agent configuration.
//!
//! Values come from three layers: built-in defaults, an optional JSON
//! config file, and command-line flags / environment variables applied by
//! the binaries on top. Durations are written as `"10s"`, `"5m"`,
//! `"250ms"`, `"1h"` or a bare number of seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

// ── Server ────────────────────────────────────────────────────────

/// Configuration of the `pulsed` server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address.
    pub address: String,
    /// gRPC listen address; gRPC is disabled when unset.
    pub grpc_address: Option<String>,
    /// Snapshot interval. Zero means every write is persisted immediately.
    #[serde(deserialize_with = "de_duration")]
    pub store_interval: Duration,
    /// Snapshot file; an empty path disables file durability.
    pub store_file: Option<PathBuf>,
    /// Load the snapshot on startup.
    pub restore: bool,
    /// Transactional database DSN (`redb:<path>` or `memory:`). Takes precedence.
    pub database_dsn: Option<String>,
    /// Shared HMAC key.
    pub key: Option<String>,
    /// CIDR of callers allowed to push metrics.
    pub trusted_subnet: Option<String>,
    /// Retries for transient storage failures.
    pub retry_count: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            grpc_address: None,
            store_interval: Duration::from_secs(300),
            store_file: Some(PathBuf::from("/tmp/metrics-db.json")),
            restore: true,
            database_dsn: None,
            key: None,
            trusted_subnet: None,
            retry_count: 3,
        }
    }
}

impl ServerConfig {
    /// Defaults overlaid with the JSON file at `path`, if given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => read_json(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::Invalid("address must not be empty".into()));
        }
        Ok(())
    }

    /// Snapshot path, treating an empty string as "no file".
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.store_file
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    pub fn dsn(&self) -> Option<&str> {
        self.database_dsn.as_deref().filter(|d| !d.is_empty())
    }
}

// ── Agent ─────────────────────────────────────────────────────────

/// Configuration of the `pulse-agent` binary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Server HTTP address.
    pub address: String,
    /// Server gRPC address; when set, metrics are delivered over gRPC.
    pub grpc_address: Option<String>,
    #[serde(deserialize_with = "de_duration")]
    pub report_interval: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub poll_interval: Duration,
    /// Shared HMAC key.
    pub key: Option<String>,
    /// Number of concurrent delivery workers.
    pub rate_limit: usize,
    /// Retries for transport failures.
    pub retry_count: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            grpc_address: None,
            report_interval: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
            key: None,
            rate_limit: 1,
            retry_count: 3,
        }
    }
}

impl AgentConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => read_json(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll interval must be positive".into()));
        }
        if self.report_interval.is_zero() {
            return Err(ConfigError::Invalid("report interval must be positive".into()));
        }
        if self.rate_limit == 0 {
            return Err(ConfigError::Invalid("rate limit must be at least 1".into()));
        }
        Ok(())
    }
}

// ── Durations ─────────────────────────────────────────────────────

/// Parse `"250ms"`, `"10s"`, `"5m"`, `"1h"` or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let invalid = || ConfigError::InvalidDuration(s.to_string());
    let (number, unit_ms) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000)
    } else {
        (s, 1_000)
    };
    let n: u64 = number.trim().parse().map_err(|_| invalid())?;
    n.checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(invalid)
}

fn de_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
