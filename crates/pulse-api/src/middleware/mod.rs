//! Request pipeline around the metric handlers.
//!
//! Mutating routes, outermost first:
//!
//! ```text
//! log_request → compress_response → enforce_subnet → verify_signature → decompress_request → handler
//! ```
//!
//! Read-only routes skip the subnet and signature checks. The signature is
//! checked against the body as it arrived on the wire, which is why
//! decompression sits inside it.

pub mod compression;
pub mod integrity;
pub mod logging;
pub mod subnet;

use std::sync::Arc;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http_body_util::LengthLimitError;
use pulse_core::Signer;
use tracing::warn;

pub use compression::{compress_response, decompress_request};
pub use integrity::verify_signature;
pub use logging::log_request;
pub use subnet::{REAL_IP_HEADER, TrustedSubnet, enforce_subnet};

/// Largest request body accepted, before and after decompression.
pub const MAX_BODY_BYTES: usize = 4 << 20;

/// Integrity and origin checks applied to mutating requests.
#[derive(Debug, Clone)]
pub struct Security {
    pub signer: Option<Signer>,
    pub subnet: Arc<TrustedSubnet>,
}

impl Security {
    pub fn new(key: Option<&str>, trusted_subnet: Option<&str>) -> Self {
        Self {
            signer: Signer::from_key(key),
            subnet: Arc::new(TrustedSubnet::parse(trusted_subnet)),
        }
    }

    /// No key, no subnet.
    pub fn open() -> Self {
        Self::new(None, None)
    }
}

/// Read a request body into memory, capped at [`MAX_BODY_BYTES`].
pub(crate) async fn buffer_body(body: Body) -> Result<Bytes, Response> {
    axum::body::to_bytes(body, MAX_BODY_BYTES).await.map_err(|e| {
        let e = e.into_inner();
        if e.is::<LengthLimitError>() {
            (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response()
        } else {
            warn!(error = %e, "failed to read request body");
            (StatusCode::BAD_REQUEST, "unreadable request body").into_response()
        }
    })
}

/// Read a response body produced by an inner handler.
pub(crate) async fn buffer_response(body: Body) -> Result<Bytes, Response> {
    axum::body::to_bytes(body, usize::MAX).await.map_err(|e| {
        warn!(error = %e, "failed to buffer response body");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}
