//! pulse-api: the server side of metric ingestion.
//!
//! [`MetricsService`] implements update and lookup once; the axum router
//! and the tonic service are thin front ends over it.
//!
//! # HTTP Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Plain-text listing of every metric |
//! | GET | `/ping` | 200 when the backend answers, else 500 |
//! | GET | `/value/{kind}/{id}` | Plain-text current value |
//! | POST | `/value` | `{id, type}` → full metric JSON |
//! | POST | `/update/{kind}/{id}/{value}` | Update from path segments |
//! | POST | `/update` | Update one metric, returns stored value |
//! | POST | `/updates` | Update a batch, returns stored values |
//!
//! The three `/update*` routes are mutating and pass through the trusted
//! subnet and signature checks; see [`middleware`].

pub mod grpc;
pub mod handlers;
pub mod middleware;
pub mod service;

/// Generated protobuf types and gRPC service stubs.
pub mod proto {
    tonic::include_proto!("pulse.metrics");
}

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};

pub use grpc::{GrpcMetrics, PeerGuard, SIGNATURE_METADATA, signed_bytes};
pub use middleware::{MAX_BODY_BYTES, Security, TrustedSubnet};
pub use service::{MetricsService, PING_TIMEOUT, ServiceError, ServiceResult};

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct ApiState {
    pub service: MetricsService,
}

/// Build the HTTP router with the full middleware stack.
pub fn build_router(service: MetricsService, security: Security) -> Router {
    let reads = Router::new()
        .route("/", get(handlers::list_metrics))
        .route("/ping", get(handlers::ping))
        .route("/value/{kind}/{id}", get(handlers::get_value))
        .route("/value", post(handlers::query_value))
        .route_layer(from_fn(middleware::decompress_request));

    let writes = Router::new()
        .route("/update/{kind}/{id}/{value}", post(handlers::update_from_path))
        .route("/update", post(handlers::update_json))
        .route("/updates", post(handlers::update_batch))
        .route_layer(from_fn(middleware::decompress_request))
        .route_layer(from_fn_with_state(security.signer, middleware::verify_signature))
        .route_layer(from_fn_with_state(security.subnet, middleware::enforce_subnet));

    Router::new()
        .merge(reads)
        .merge(writes)
        .layer(from_fn(middleware::compress_response))
        .layer(from_fn(middleware::log_request))
        .with_state(ApiState { service })
}
