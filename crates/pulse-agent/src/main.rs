//! pulse-agent: metrics agent binary.
//!
//! # Usage
//!
//! ```text
//! pulse-agent -a localhost:8080 -p 2s -r 10s -l 4 -k secret
//! ```
//!
//! Flags override environment variables, which override the JSON config
//! file given with `-c`, which overrides built-in defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use pulse_agent::{Agent, Collector, Dispatcher, Transport};
use pulse_core::config::parse_duration;
use pulse_core::{AgentConfig, RetryPolicy, Signer};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pulse-agent", about = "Pulse metrics agent")]
struct Cli {
    /// JSON config file.
    #[arg(short = 'c', long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Server HTTP address.
    #[arg(short = 'a', long, env = "ADDRESS")]
    address: Option<String>,

    /// Server gRPC address; switches delivery to gRPC.
    #[arg(long, env = "GRPC_ADDRESS")]
    grpc_address: Option<String>,

    /// How often to ship accumulated metrics (`10s`, `1m`, or seconds).
    #[arg(short = 'r', long, env = "REPORT_INTERVAL", value_parser = duration_arg)]
    report_interval: Option<Duration>,

    /// How often to sample telemetry.
    #[arg(short = 'p', long, env = "POLL_INTERVAL", value_parser = duration_arg)]
    poll_interval: Option<Duration>,

    /// Shared key for request signing.
    #[arg(short = 'k', long, env = "KEY")]
    key: Option<String>,

    /// Concurrent delivery workers.
    #[arg(short = 'l', long, env = "RATE_LIMIT")]
    rate_limit: Option<usize>,

    /// Retries per metric on transport failure.
    #[arg(long, env = "RETRY_COUNT")]
    retry_count: Option<u32>,
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

impl Cli {
    fn apply(self, config: &mut AgentConfig) {
        if let Some(address) = self.address {
            config.address = address;
        }
        if self.grpc_address.is_some() {
            config.grpc_address = self.grpc_address;
        }
        if let Some(interval) = self.report_interval {
            config.report_interval = interval;
        }
        if let Some(interval) = self.poll_interval {
            config.poll_interval = interval;
        }
        if self.key.is_some() {
            config.key = self.key;
        }
        if let Some(limit) = self.rate_limit {
            config.rate_limit = limit;
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
                .unwrap_or_else(|_| EnvFilter::new("info,pulse_agent=debug,pulse=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AgentConfig::load(cli.config.as_deref()).context("loading agent config")?;
    cli.apply(&mut config);
    config.validate().context("invalid agent configuration")?;

    let signer = Signer::from_key(config.key.as_deref());
    let transport = Transport::from_config(&config.address, config.grpc_address.as_deref(), signer)
        .context("configuring transport")?;
    info!(
        transport = transport.name(),
        address = %config.address,
        grpc_address = ?config.grpc_address,
        signed = config.key.as_deref().is_some_and(|k| !k.is_empty()),
        "pulse agent starting"
    );

    let dispatcher = Dispatcher::new(
        transport,
        config.rate_limit,
        RetryPolicy::linear(config.retry_count),
    );
    let agent = Agent::new(
        Collector::new(),
        dispatcher,
        config.poll_interval,
        config.report_interval,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for Ctrl-C, running until killed");
                // Keep the sender alive so the agent does not see a closed channel.
                std::future::pending::<()>().await;
            }
        }
    });

    agent.run(shutdown_rx).await;
    Ok(())
}
