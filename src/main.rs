//! autoclash
//!
//! Keeps a Clash selector group on a healthy, low-latency, low-cost proxy.
//!
//! Usage:
//!   autoclash --config config.toml
//!
//! The config file is TOML. YAML `config.yml` files from earlier releases are
//! not read; convert them to TOML with the same field names.
//!
//! Environment Variables:
//!   AUTOCLASH_CONFIG - Path to TOML config file
//!   AUTOCLASH_<FIELD> - Override a single config field (e.g. AUTOCLASH_API_KEY)
//!   RUST_LOG - Log filter (default: autoclash=info)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autoclash::failover::{AutoclashConfig, FailoverRunner, HttpControlApi};

#[derive(Parser, Debug)]
#[command(name = "autoclash")]
#[command(about = "Automatic latency and cost aware failover for Clash proxy groups")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "AUTOCLASH_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Log level used when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single refresh, selection and health check, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_tracing(&args.log_level);

    info!("Starting autoclash");

    let config = AutoclashConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    info!(
        api = %config.api_endpoint,
        selector = %config.select_node,
        threshold_ms = config.latency_threshold,
        trials = config.test_times,
        "configuration loaded"
    );

    let api = HttpControlApi::from_config(&config).context("Failed to build control API client")?;
    let runner = FailoverRunner::from_config(&config, Arc::new(api))?;

    if args.once {
        let status = runner.run_once().await.context("Endpoint list refresh failed")?;
        info!(?status, "single cycle finished");
        return Ok(());
    }

    let mut handles = runner.spawn();
    tokio::select! {
        res = &mut handles.snapshot => error!(?res, "snapshot loop exited"),
        res = &mut handles.selector => error!(?res, "selector loop exited"),
        res = &mut handles.failover => error!(?res, "failover loop exited"),
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
    }
    handles.abort();

    Ok(())
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("autoclash={}", default_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
