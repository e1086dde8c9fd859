//! gzip request decoding and response encoding.

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, VARY};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use pulse_core::codec::{self, CodecError, GZIP};
use tracing::{debug, warn};

use super::{MAX_BODY_BYTES, buffer_body, buffer_response};

/// Inflate bodies sent with `Content-Encoding: gzip`.
pub async fn decompress_request(req: Request, next: Next) -> Response {
    let gzipped = req
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(GZIP));
    if !gzipped {
        return next.run(req).await;
    }

    let (mut parts, body) = req.into_parts();
    let compressed = match buffer_body(body).await {
        Ok(bytes) => bytes,
        Err(rejection) => return rejection,
    };
    let plain = match codec::decompress(&compressed, MAX_BODY_BYTES) {
        Ok(plain) => plain,
        Err(e @ CodecError::TooLarge { .. }) => {
            return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response();
        }
        Err(e) => {
            debug!(error = %e, "bad gzip request body");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    parts.headers.remove(CONTENT_ENCODING);
    parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(plain.len()));
    next.run(Request::from_parts(parts, Body::from(plain))).await
}

/// gzip JSON and plain-text responses for callers that accept it.
pub async fn compress_response(req: Request, next: Next) -> Response {
    let wants_gzip = req
        .headers()
        .get(ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(codec::accepts_gzip);

    let response = next.run(req).await;
    if !wants_gzip || !compressible(&response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match buffer_response(body).await {
        Ok(bytes) => bytes,
        Err(failure) => return failure,
    };
    match codec::compress(&bytes) {
        Ok(gz) => {
            parts.headers.insert(CONTENT_ENCODING, HeaderValue::from_static(GZIP));
            parts.headers.remove(CONTENT_LENGTH);
            parts.headers.append(VARY, HeaderValue::from_static("accept-encoding"));
            Response::from_parts(parts, Body::from(gz))
        }
        Err(e) => {
            warn!(error = %e, "response compression failed, sending identity");
            Response::from_parts(parts, Body::from(bytes))
        }
    }
}

fn compressible(response: &Response) -> bool {
    if response.headers().contains_key(CONTENT_ENCODING) {
        return false;
    }
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json") || ct.starts_with("text/plain"))
}
