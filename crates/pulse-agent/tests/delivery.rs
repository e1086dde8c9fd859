//! The agent's HTTP sender against the real server router.
//!
//! Each test binds a loopback listener, serves `build_router` on it and
//! delivers through `HttpSender`, so the gzip body, `X-Real-IP`, request
//! signature and reply signature all cross a real socket.

use std::sync::Arc;
use std::time::Duration;

use pulse_agent::{HttpSender, MetricSender, SendError};
use pulse_api::{MetricsService, Security, build_router};
use pulse_core::{Metric, MetricKind, RetryPolicy, Signer};
use pulse_store::{MemStorage, Persistence, Storage};

const KEY: &str = "s3cret";

async fn serve(security: Security) -> (String, MetricsService) {
    let storage = Arc::new(Storage::Memory(MemStorage::new()));
    let persistence = Arc::new(Persistence::new(storage, Duration::ZERO));
    let service = MetricsService::new(persistence, RetryPolicy::none());

    let router = build_router(service.clone(), security);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr.to_string(), service)
}

#[tokio::test]
async fn signed_delivery_from_trusted_subnet_returns_stored_values() {
    let (addr, service) = serve(Security::new(Some(KEY), Some("127.0.0.0/8"))).await;
    let sender = HttpSender::new(&addr, Some(Signer::new(KEY)));

    let stored = sender.send(&Metric::counter("c1", 5)).await.unwrap();
    assert_eq!(stored, Metric::counter("c1", 5));
    let stored = sender.send(&Metric::counter("c1", 3)).await.unwrap();
    assert_eq!(stored, Metric::counter("c1", 8));
    let stored = sender.send(&Metric::gauge("g1", 2.5)).await.unwrap();
    assert_eq!(stored, Metric::gauge("g1", 2.5));

    assert_eq!(
        service.value(MetricKind::Counter, "c1").await.unwrap(),
        Metric::counter("c1", 8)
    );
}

#[tokio::test]
async fn wrong_key_is_rejected_before_storage() {
    let (addr, service) = serve(Security::new(Some(KEY), None)).await;
    let sender = HttpSender::new(&addr, Some(Signer::new("other")));

    let err = sender.send(&Metric::counter("c1", 5)).await.unwrap_err();
    assert!(
        matches!(&err, SendError::Rejected { status, .. } if status.starts_with("400")),
        "{err}"
    );
    assert!(service.value(MetricKind::Counter, "c1").await.is_err());
}

#[tokio::test]
async fn agent_outside_trusted_subnet_is_forbidden() {
    let (addr, _service) = serve(Security::new(None, Some("10.0.0.0/8"))).await;
    let sender = HttpSender::new(&addr, None);

    let err = sender.send(&Metric::gauge("g1", 1.0)).await.unwrap_err();
    assert!(
        matches!(&err, SendError::Rejected { status, .. } if status.starts_with("403")),
        "{err}"
    );
}

#[tokio::test]
async fn keyed_agent_refuses_unsigned_reply() {
    // The server has no key, so it applies the update but signs nothing.
    let (addr, service) = serve(Security::open()).await;
    let sender = HttpSender::new(&addr, Some(Signer::new(KEY)));

    let err = sender.send(&Metric::counter("c1", 1)).await.unwrap_err();
    assert!(matches!(err, SendError::Unverified(_)), "{err}");
    assert!(!err.is_transport());
    assert_eq!(
        service.value(MetricKind::Counter, "c1").await.unwrap(),
        Metric::counter("c1", 1)
    );
}
