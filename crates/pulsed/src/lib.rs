//! pulsed: assembles storage, persistence and the HTTP and gRPC front
//! ends into one server.
//!
//! [`serve`] owns the whole lifecycle, shutdown included, so the binary
//! and the integration tests drive exactly the same path.
//!
//! # Shutdown order
//!
//! 1. The shutdown future resolves.
//! 2. Both servers stop accepting and drain in-flight requests.
//! 3. The snapshot loop is told to stop and writes its final dump.
//!
//! Step 3 waits for step 2, so every acknowledged write is in the final
//! snapshot.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use pulse_api::{GrpcMetrics, MetricsService, Security, build_router};
use pulse_core::{RetryPolicy, ServerConfig};
use pulse_store::{Persistence, StorageConfig, open_storage};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Resolves once `rx` carries `true` or its sender is gone.
async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Run the server on `listener` until `shutdown` resolves.
pub async fn serve(
    config: ServerConfig,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("pulse server starting");
    let retry = RetryPolicy::linear(config.retry_count);

    // ── Storage ────────────────────────────────────────────────

    let storage = open_storage(&StorageConfig {
        dsn: config.dsn().map(str::to_string),
        snapshot: config.snapshot_path().map(Path::to_path_buf),
    })
    .context("opening metric storage")?;
    let storage = Arc::new(storage);

    let persistence = Arc::new(Persistence::new(Arc::clone(&storage), config.store_interval));
    info!(mode = ?persistence.mode(), "durability configured");

    if config.restore {
        let restored = persistence
            .restore(retry)
            .await
            .context("restoring metrics snapshot")?;
        info!(restored, "snapshot restored");
    }

    let service = MetricsService::new(Arc::clone(&persistence), retry);
    let security = Security::new(config.key.as_deref(), config.trusted_subnet.as_deref());

    // ── Shutdown signals ───────────────────────────────────────

    // Servers stop first; the snapshot loop only after they have drained.
    let (stop_tx, stop_rx) = watch::channel(false);
    let (snapshot_tx, snapshot_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────

    let snapshot_handle = {
        let persistence = Arc::clone(&persistence);
        tokio::spawn(async move { persistence.run(snapshot_rx).await })
    };

    // ── gRPC server ────────────────────────────────────────────

    let grpc_handle = match config.grpc_address.as_deref().filter(|a| !a.is_empty()) {
        Some(grpc_address) => {
            let addr = tokio::net::lookup_host(grpc_address)
                .await
                .with_context(|| format!("resolving gRPC address {grpc_address}"))?
                .next()
                .with_context(|| format!("gRPC address {grpc_address} resolved to nothing"))?;
            let grpc = GrpcMetrics::new(service.clone(), security.signer.clone())
                .into_service(Arc::clone(&security.subnet));

            info!(%addr, "gRPC server starting");
            let stop = stopped(stop_rx.clone());
            Some(tokio::spawn(async move {
                if let Err(e) = tonic::transport::Server::builder()
                    .add_service(grpc)
                    .serve_with_shutdown(addr, stop)
                    .await
                {
                    error!(error = %e, "gRPC server error");
                }
            }))
        }
        None => None,
    };

    // ── HTTP server ────────────────────────────────────────────

    let router = build_router(service, security);
    info!(addr = %listener.local_addr()?, "HTTP server starting");

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        shutdown.await;
        info!("shutdown signal received, draining requests");
        let _ = stop_tx.send(true);
    });
    let served = server.await;

    // ── Clean up ───────────────────────────────────────────────

    if let Some(handle) = grpc_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "gRPC server task failed");
        }
    }

    // Nothing can write any more; take the final snapshot.
    let _ = snapshot_tx.send(true);
    match snapshot_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "final snapshot flush failed"),
        Err(e) => error!(error = %e, "snapshot task failed"),
    }
    if persistence.is_immediate() {
        persistence.flush().context("final snapshot flush")?;
    }

    served.context("HTTP server")?;
    info!("pulse server stopped");
    Ok(())
}
