//! # Scan Engine
//!
//! Runs the dispatcher until the first fatal fault. Exits non-zero on any
//! startup error or fatal fault.

use anyhow::Context;
use clap::Parser;
use scan_engine::config::{ConfigManager, ConfigOverrides};
use scan_engine::logging::init_structured_logging;
use scan_engine::ScanEngine;
use std::path::PathBuf;
use std::process;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "scan-engine")]
#[command(about = "Pull scan requests from NATS JetStream, run them and publish the results")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (YAML or TOML)
    #[arg(short, long, env = "SCANENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Message bus host
    #[arg(long, env = "SCANENGINE_BUSHOST")]
    bus_host: Option<String>,

    /// Message bus port
    #[arg(long, env = "SCANENGINE_BUSPORT")]
    bus_port: Option<u16>,

    /// Number of scan workers
    #[arg(short, long, env = "SCANENGINE_WORKERS", allow_negative_numbers = true)]
    workers: Option<i64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "SCANENGINE_LOGLEVEL")]
    log_level: Option<String>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    check_config: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            bus_host: self.bus_host.clone(),
            bus_port: self.bus_port,
            workers: self.workers,
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        eprintln!("scan-engine: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let manager = ConfigManager::load_with_overrides(cli.config.as_deref(), &cli.overrides())
        .context("failed to load configuration")?;
    let config = manager.config();

    if cli.check_config {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    init_structured_logging(&config.logging);
    for warning in manager.warnings() {
        warn!("{warning}");
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        endpoint = %config.bus.endpoint(),
        config_file = ?manager.source(),
        "Starting scan engine"
    );

    let engine = ScanEngine::bootstrap(config)
        .await
        .context("failed to start scan engine")?;
    engine.run().await.context("scan engine stopped")?;
    Ok(())
}
