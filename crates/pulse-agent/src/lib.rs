//! pulse-agent: samples telemetry and ships it to a Pulse server.
//!
//! # Architecture
//!
//! ```text
//! poll tick ── Collector ──(fresh mpsc per tick)──▶ PendingBatch
//!                                                     │
//! report tick ─────────── drain ──────────────────────┘
//!                           │
//!                 Dispatcher (rate_limit workers, one shared channel)
//!                           │ retry transport failures, drop on rejection
//!                           ▼
//!              Transport::Http (POST /update) | Transport::Grpc (UpdateMetrics)
//! ```

pub mod agent;
pub mod batch;
pub mod collector;
pub mod dispatcher;
pub mod transport;

#[cfg(test)]
mod testing;

pub use agent::Agent;
pub use batch::PendingBatch;
pub use collector::{CollectError, Collector, Probe, SysinfoProbe};
pub use dispatcher::{DispatchReport, Dispatcher};
pub use transport::{GrpcSender, HttpSender, MetricSender, SendError, Transport};
