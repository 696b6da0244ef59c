// src/main.rs

//! The main entry point for the ClusterOS agent.

use anyhow::Result;
use clusteros::config::{Config, LogFormat};
use clusteros::core::overlay::StaticOverlay;
use clusteros::daemon::Daemon;
use std::env;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("ClusterOS version {VERSION}");
        return Ok(());
    }

    // The configuration path may be provided via --config; otherwise the
    // default locations and CLUSTEROS_ environment variables apply.
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config = match Config::load(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    // RUST_LOG overrides the configured level.
    let filter =
        EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_filter()));
    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .compact()
                .with_ansi(true)
                .init();
        }
    }

    // The overlay is opaque to the agent; without an external provider the
    // discovery loop sees no peers and bootstrap peers drive the join.
    let overlay = Arc::new(StaticOverlay::default());

    let daemon = match Daemon::start(config, overlay).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("Agent failed to start: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = daemon.run().await {
        error!("Agent runtime error: {e:#}");
        return Err(e);
    }
    Ok(())
}
