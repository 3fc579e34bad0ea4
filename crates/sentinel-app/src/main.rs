//! Sentinel exit-parameter coordination service - entry point.

use anyhow::Result;
use clap::Parser;
use sentinel_app::{AppConfig, Application};
use tracing::info;

/// Sentinel exit-parameter coordination service
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via SENTINEL_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    sentinel_telemetry::init_logging()?;

    info!("Starting Sentinel v{}", env!("CARGO_PKG_VERSION"));

    // Config path: CLI arg > SENTINEL_CONFIG env var > default with
    // fallback to built-in defaults when the default file is absent.
    let config = match args.config {
        Some(path) => {
            info!(config_path = %path, "Loading configuration");
            AppConfig::from_file(&path)?
        }
        None => AppConfig::load()?,
    };
    info!(?config.mode, facade_port = config.facade.port, "Configuration loaded");

    if args.check_config {
        info!("Configuration valid");
        return Ok(());
    }

    Application::new(config).run().await?;

    Ok(())
}
