//! Shutdown regression tests.
//!
//! Runs the whole server on a loopback listener and checks that a write
//! still draining when the shutdown signal arrives makes it into the final
//! deferred snapshot.

use std::path::Path;
use std::time::Duration;

use pulse_core::{Metric, MetricKind, ServerConfig};
use pulse_store::{FileStorage, Repository};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

fn deferred_config(snapshot: &Path) -> ServerConfig {
    ServerConfig {
        store_interval: Duration::from_secs(3600),
        store_file: Some(snapshot.to_path_buf()),
        restore: false,
        retry_count: 0,
        ..ServerConfig::default()
    }
}

#[tokio::test]
async fn write_draining_at_shutdown_reaches_final_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.json");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(pulsed::serve(deferred_config(&path), listener, async move {
        let _ = stop_rx.await;
    }));

    // Start a request but hold back the tail of its body.
    let body = br#"{"id":"c1","type":"counter","delta":5}"#;
    let head = format!(
        "POST /update HTTP/1.1\r\nhost: {addr}\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n",
        body.len()
    );
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(head.as_bytes()).await.unwrap();
    client.write_all(&body[..10]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    stop_tx.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The server is draining; finish the request.
    client.write_all(&body[10..]).await.unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");

    server.await.unwrap().unwrap();

    let restarted = FileStorage::new(&path);
    assert_eq!(restarted.load().unwrap(), 1);
    assert_eq!(
        restarted.get(MetricKind::Counter, "c1").unwrap(),
        Metric::counter("c1", 5)
    );
}

#[tokio::test]
async fn idle_shutdown_writes_snapshot_of_earlier_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.json");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(pulsed::serve(deferred_config(&path), listener, async move {
        let _ = stop_rx.await;
    }));

    let mut client = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "POST /update/gauge/g1/2.5 HTTP/1.1\r\nhost: {addr}\r\nconnection: close\r\n\r\n"
    );
    client.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");

    // Deferred mode: nothing on disk until shutdown.
    assert!(!path.exists());

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();

    let restarted = FileStorage::new(&path);
    assert_eq!(restarted.load().unwrap(), 1);
    assert_eq!(
        restarted.get(MetricKind::Gauge, "g1").unwrap(),
        Metric::gauge("g1", 2.5)
    );
}
