//! HMAC verification of request bodies and signing of responses.
//!
//! The signature covers the body exactly as received, so this layer must
//! run before request decompression.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use pulse_core::{HASH_HEADER, Signer};
use tracing::warn;

use super::{buffer_body, buffer_response};

/// `HashSHA256` in the lower-case form header maps store.
const SIGNATURE: HeaderName = HeaderName::from_static("hashsha256");

/// Verify `HashSHA256` on the incoming body and sign the outgoing one.
/// A no-op when no key is configured.
pub async fn verify_signature(
    State(signer): State<Option<Signer>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(signer) = signer else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let bytes = match buffer_body(body).await {
        Ok(bytes) => bytes,
        Err(rejection) => return rejection,
    };

    let signature = parts.headers.get(HASH_HEADER).and_then(|v| v.to_str().ok());
    match signature {
        Some(sig) if signer.verify(&bytes, sig) => {}
        Some(_) => {
            warn!(uri = %parts.uri, "request signature mismatch");
            return (StatusCode::BAD_REQUEST, "signature mismatch").into_response();
        }
        None => {
            warn!(uri = %parts.uri, "unsigned request rejected");
            return (StatusCode::BAD_REQUEST, "missing HashSHA256 header").into_response();
        }
    }

    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
    if !response.status().is_success() {
        return response;
    }
    sign_response(&signer, response).await
}

async fn sign_response(signer: &Signer, response: Response) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes = match buffer_response(body).await {
        Ok(bytes) => bytes,
        Err(rejection) => return rejection,
    };
    if let Ok(value) = HeaderValue::from_str(&signer.sign(&bytes)) {
        parts.headers.insert(SIGNATURE, value);
    }
    Response::from_parts(parts, Body::from(bytes))
}
