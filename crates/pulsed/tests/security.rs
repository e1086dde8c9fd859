//! Security and compression regression tests.
//!
//! Signatures, trusted subnet and gzip on both directions, driven through
//! the full middleware stack.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use pulse_api::{Security, build_router};
use pulse_core::{Signer, codec};
use serde_json::json;
use tower::ServiceExt;

use common::*;

const KEY: &str = "s3cret";

fn signed_router() -> axum::Router {
    build_router(memory_service(), Security::new(Some(KEY), None))
}

fn subnet_router(cidr: &str) -> axum::Router {
    build_router(memory_service(), Security::new(None, Some(cidr)))
}

fn update_body(delta: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({"id": "c1", "type": "counter", "delta": delta})).unwrap()
}

fn signed_update(body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/update")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("HashSHA256", signature);
    }
    builder.body(Body::from(body)).unwrap()
}

fn update_from(ip: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/update")
        .header("content-type", "application/json");
    if let Some(ip) = ip {
        builder = builder.header("X-Real-IP", ip);
    }
    builder.body(Body::from(update_body(1))).unwrap()
}

// ── Signatures ─────────────────────────────────────────────────

#[tokio::test]
async fn signed_request_is_accepted_and_reply_is_signed() {
    let signer = Signer::new(KEY);
    let body = update_body(12);
    let signature = signer.sign(&body);

    let resp = signed_router()
        .oneshot(signed_update(body, Some(signature)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let reply_signature = resp.headers()["HashSHA256"].to_str().unwrap().to_string();
    let reply = body_bytes(resp).await;
    assert!(signer.verify(&reply, &reply_signature));
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&reply).unwrap()["delta"],
        12
    );
}

#[tokio::test]
async fn tampered_request_is_rejected_before_storage() {
    let router = signed_router();
    let signature = Signer::new(KEY).sign(&update_body(12));

    let resp = router
        .clone()
        .oneshot(signed_update(update_body(13), Some(signature)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = router.oneshot(get("/value/counter/c1")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wrong_key_or_garbage_signature_is_rejected() {
    let router = signed_router();
    let body = update_body(1);
    for signature in [Signer::new("other").sign(&body), "not base64!".to_string()] {
        let resp = router
            .clone()
            .oneshot(signed_update(body.clone(), Some(signature)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn missing_signature_is_rejected_when_key_configured() {
    let resp = signed_router()
        .oneshot(signed_update(update_body(1), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unsigned_requests_pass_without_key() {
    let resp = open_router()
        .oneshot(signed_update(update_body(1), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get("HashSHA256").is_none());
}

#[tokio::test]
async fn signature_covers_compressed_bytes() {
    let signer = Signer::new(KEY);
    let gz = codec::compress(&update_body(4)).unwrap();
    let req = Request::builder()
        .method("POST")
        .uri("/update")
        .header("content-type", "application/json")
        .header("content-encoding", "gzip")
        .header("HashSHA256", signer.sign(&gz))
        .body(Body::from(gz))
        .unwrap();

    let resp = signed_router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn reads_do_not_need_a_signature() {
    let router = signed_router();
    let body = update_body(2);
    let signature = Signer::new(KEY).sign(&body);
    router
        .clone()
        .oneshot(signed_update(body, Some(signature)))
        .await
        .unwrap();

    let resp = router.oneshot(get("/value/counter/c1")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "2");
}

// ── Trusted subnet ─────────────────────────────────────────────

#[tokio::test]
async fn caller_inside_subnet_is_accepted() {
    let resp = subnet_router("10.0.0.0/8")
        .oneshot(update_from(Some("10.1.2.3")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn caller_outside_or_unidentified_is_forbidden() {
    let router = subnet_router("10.0.0.0/8");
    for ip in [Some("192.168.1.1"), Some("garbage"), None] {
        let resp = router.clone().oneshot(update_from(ip)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{ip:?}");
    }
    let resp = router.oneshot(get("/")).await.unwrap();
    assert_eq!(body_text(resp).await, "");
}

#[tokio::test]
async fn invalid_cidr_forbids_every_update() {
    let router = subnet_router("10.0.0.0/33");
    let resp = router
        .clone()
        .oneshot(update_from(Some("10.1.2.3")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // Reads stay available.
    let resp = router.oneshot(get("/ping")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// ── Compression ────────────────────────────────────────────────

#[tokio::test]
async fn gzip_request_body_is_accepted() {
    let router = open_router();
    let gz = codec::compress(&update_body(7)).unwrap();
    let req = Request::builder()
        .method("POST")
        .uri("/update")
        .header("content-type", "application/json")
        .header("content-encoding", "gzip")
        .body(Body::from(gz))
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = router.oneshot(get("/value/counter/c1")).await.unwrap();
    assert_eq!(body_text(resp).await, "7");
}

#[tokio::test]
async fn corrupt_gzip_is_a_bad_request() {
    let req = Request::builder()
        .method("POST")
        .uri("/update")
        .header("content-type", "application/json")
        .header("content-encoding", "gzip")
        .body(Body::from("definitely not gzip"))
        .unwrap();
    let resp = open_router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn responses_are_gzipped_on_request() {
    let router = open_router();
    router
        .clone()
        .oneshot(post_json("/update", &json!({"id": "g1", "type": "gauge", "value": 2.5})))
        .await
        .unwrap();

    let req = Request::builder()
        .uri("/value/gauge/g1")
        .header("accept-encoding", "gzip, deflate")
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-encoding"], "gzip");
    let plain = codec::decompress(&body_bytes(resp).await, 1 << 20).unwrap();
    assert_eq!(plain, b"2.5");

    // Without Accept-Encoding the body stays plain.
    let resp = router.oneshot(get("/value/gauge/g1")).await.unwrap();
    assert!(resp.headers().get("content-encoding").is_none());
    assert_eq!(body_text(resp).await, "2.5");
}
