//! sentinel-tunnel
//!
//! Sidecar that exposes Redis databases on fixed local ports and always
//! forwards to the current master reported by Sentinel.

use anyhow::{Context, Result};
use clap::Parser;
use sentinel_tunnel::{cli::Cli, Config, Supervisor};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli).context("failed to load configuration")?;

    // Initialize tracing (prefer RUST_LOG, fallback to the configured level)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting sentinel-tunnel");
    info!(
        sentinels = ?config.sentinels,
        databases = %config
            .databases
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(","),
        retry_count = config.retry_count,
        retry_backoff_ms = config.retry_backoff.as_millis() as u64,
        http_addr = %config.http_addr,
        "Configuration loaded"
    );

    let supervisor = Supervisor::start(&config)
        .await
        .context("failed to start tunnel")?;

    let result = supervisor.run(shutdown_signal()).await;
    if let Err(e) = &result {
        error!(error = %e, "Tunnel failed");
    }
    result.context("tunnel stopped with an error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
