//! pulse-core: shared building blocks for the Pulse agent and server.
//!
//! # Modules
//!
//! - **`metric`**: `Metric` value object (gauge or counter) and its wire form
//! - **`retry`**: bounded, linearly backed-off retry for transient failures
//! - **`signing`**: HMAC-SHA256 payload signatures carried in `HashSHA256`
//! - **`codec`**: gzip compression of request/response bodies
//! - **`config`**: server and agent configuration with JSON file overlay

pub mod codec;
pub mod config;
pub mod metric;
pub mod retry;
pub mod signing;

pub use config::{AgentConfig, ConfigError, ServerConfig};
pub use metric::{Metric, MetricError, MetricKind, MetricQuery, MetricValue, RawMetric};
pub use retry::{RetryPolicy, retry};
pub use signing::{HASH_HEADER, Signer};
