//! pulsed: the Pulse metrics server.
//!
//! Single binary that assembles:
//! - Metric storage (memory, snapshot file or redb)
//! - Snapshot persistence and startup restore
//! - HTTP ingestion API
//! - gRPC `UpdateMetrics` service (optional)
//!
//! # Usage
//!
//! ```text
//! pulsed -a 0.0.0.0:8080 -i 300s -f /var/lib/pulse/metrics.json -r true
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use pulse_core::ServerConfig;
use pulse_core::config::parse_duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pulsed", about = "Pulse metrics server")]
struct Cli {
    /// JSON config file.
    #[arg(short = 'c', long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address.
    #[arg(short = 'a', long, env = "ADDRESS")]
    address: Option<String>,

    /// gRPC listen address; gRPC stays off when unset.
    #[arg(long, env = "GRPC_ADDRESS")]
    grpc_address: Option<String>,

    /// Snapshot interval (`300s`, `5m`, or seconds); 0 persists every write.
    #[arg(short = 'i', long, env = "STORE_INTERVAL", value_parser = duration_arg)]
    store_interval: Option<Duration>,

    /// Snapshot file; empty disables file durability.
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    store_file: Option<PathBuf>,

    /// Load the snapshot on startup.
    #[arg(short = 'r', long, env = "RESTORE")]
    restore: Option<bool>,

    /// Database DSN (`redb:<path>` or `memory:`).
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    database_dsn: Option<String>,

    /// Shared key for request signing.
    #[arg(short = 'k', long, env = "KEY")]
    key: Option<String>,

    /// CIDR allowed to push metrics.
    #[arg(short = 't', long, env = "TRUSTED_SUBNET")]
    trusted_subnet: Option<String>,

    /// Retries for transient storage failures.
    #[arg(long, env = "RETRY_COUNT")]
    retry_count: Option<u32>,
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

impl Cli {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(address) = self.address {
            config.address = address;
        }
        if self.grpc_address.is_some() {
            config.grpc_address = self.grpc_address;
        }
        if let Some(interval) = self.store_interval {
            config.store_interval = interval;
        }
        if self.store_file.is_some() {
            config.store_file = self.store_file;
        }
        if let Some(restore) = self.restore {
            config.restore = restore;
        }
        if self.database_dsn.is_some() {
            config.database_dsn = self.database_dsn;
        }
        if self.key.is_some() {
            config.key = self.key;
        }
        if self.trusted_subnet.is_some() {
            config.trusted_subnet = self.trusted_subnet;
        }
        if let Some(retries) = self.retry_count {
            config.retry_count = retries;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pulsed=debug,pulse=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref()).context("loading server config")?;
    cli.apply(&mut config);
    config.validate().context("invalid server configuration")?;

    let listener = tokio::net::TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("binding {}", config.address))?;
    pulsed::serve(config, listener, ctrl_c()).await
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received");
}

