//! relaysrv binary

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use common::init_logging;
use relaysrv::config::DEFAULT_CONFIG_PATH;
use relaysrv::{ServiceConfig, SERVICE_NAME, SERVICE_VERSION};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "RELAYSRV_CONFIG",
        default_value = DEFAULT_CONFIG_PATH
    )]
    config: PathBuf,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    validate: bool,

    /// Override the configured log level (e.g. "debug", "info,relaysrv=trace")
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServiceConfig::load(&args.config)?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", args.config.display()))?;

    if args.validate {
        println!(
            "Configuration OK: {} relays ({})",
            config.relays.len(),
            args.config.display()
        );
        return Ok(());
    }

    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    init_logging(&config.logging).context("Failed to initialize logging")?;

    info!(
        "Starting {} v{} (device {})",
        SERVICE_NAME, SERVICE_VERSION, config.service.device_id
    );
    relaysrv::service::run(config).await
}
