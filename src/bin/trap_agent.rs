//! trap-agent - Headless metrics agent
//!
//! Reports process gauges to an httptrap check and keeps flushing until
//! interrupted. Useful to smoke-test a trap or check configuration.
//!
//! # Usage
//! ```sh
//! TRAPMETRICS_SUBMISSION_URL=http://127.0.0.1:56104/blah/blah cargo run --bin trap-agent -- --once
//! ```
//!
//! # Environment Variables
//! All `TRAPMETRICS_*` variables understood by `Config::from_env`, e.g.
//! - `TRAPMETRICS_API_TOKEN` - Check-management API token
//! - `TRAPMETRICS_SUBMISSION_URL` - Fixed trap URL (skips the API)
//! - `TRAPMETRICS_INTERVAL` - Flush interval (default: 10s)

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Level, info, warn};
use tracing_subscriber::prelude::*;
use trapmetrics::{Config, GaugeValue, Metrics};

#[derive(Parser)]
#[command(author, version, about = "Submit process metrics to an httptrap check", long_about = None)]
struct Cli {
    /// TOML configuration file (environment variables are used otherwise)
    #[arg(short, long)]
    config: Option<String>,

    /// Flush interval, e.g. 10s or 1m
    #[arg(short, long)]
    interval: Option<String>,

    /// Fixed trap URL; no check-management API lookup happens
    #[arg(long)]
    submission_url: Option<String>,

    /// Flush once and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("trap-agent {} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {path}"))?;
            Config::from_toml_str(&raw)?
        }
        None => Config::from_env()?,
    };
    if let Some(interval) = cli.interval {
        config.flush.interval = interval;
    }
    if let Some(url) = cli.submission_url {
        config.check.submission_url = url;
    }

    let metrics = Metrics::new(&config).context("Invalid configuration")?;
    info!(
        "Configuration loaded: interval={:?}, tag mode={:?}",
        metrics.settings().interval,
        metrics.tag_mode()
    );

    let started = Instant::now();
    metrics.set_gauge_func(
        "trap_agent.uptime_seconds",
        Arc::new(move || GaugeValue::Uint(started.elapsed().as_secs())),
    );
    metrics.set_text("trap_agent.version", env!("CARGO_PKG_VERSION"));

    if cli.once {
        let outcome = metrics.flush().await?;
        info!("Flush complete: {:?}", outcome);
        return Ok(());
    }

    metrics.start();
    info!("Agent running. Press Ctrl+C to shutdown.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Flushing...");

    match metrics.shutdown().await {
        Ok(outcome) => info!("Final flush: {:?}", outcome),
        Err(e) => warn!("Final flush failed: {}", e),
    }

    Ok(())
}
