//! Shared helpers for router-level tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::Request;
use axum::response::Response;
use pulse_api::{MetricsService, Security, build_router};
use pulse_core::RetryPolicy;
use pulse_store::{FileStorage, MemStorage, Persistence, Storage};

pub fn memory_service() -> MetricsService {
    let storage = Arc::new(Storage::Memory(MemStorage::new()));
    let persistence = Arc::new(Persistence::new(storage, Duration::ZERO));
    MetricsService::new(persistence, RetryPolicy::none())
}

/// File-backed service persisting every write.
pub fn file_service(path: &Path) -> (MetricsService, Arc<Persistence>) {
    let storage = Arc::new(Storage::File(FileStorage::new(path)));
    let persistence = Arc::new(Persistence::new(storage, Duration::ZERO));
    let service = MetricsService::new(Arc::clone(&persistence), RetryPolicy::none());
    (service, persistence)
}

pub fn open_router() -> Router {
    build_router(memory_service(), Security::open())
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

pub async fn body_bytes(resp: Response) -> Bytes {
    axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap()
}

pub async fn body_text(resp: Response) -> String {
    String::from_utf8(body_bytes(resp).await.to_vec()).unwrap()
}

pub async fn body_json(resp: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}
