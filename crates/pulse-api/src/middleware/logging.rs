//! Access log.

use std::time::Instant;

use axum::body::HttpBody;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::info;

/// Record method, URI, status, response size and latency of every request.
pub async fn log_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let started = Instant::now();

    let response = next.run(req).await;

    info!(
        %method,
        %uri,
        status = response.status().as_u16(),
        size = ?response.body().size_hint().exact(),
        latency_ms = started.elapsed().as_secs_f64() * 1000.0,
        "request served"
    );
    response
}
