//! StreamBox - extension host command line
//!
//! Runs streaming extensions against their sites and resolves the streams
//! they return.

use streambox::cli::{self, Cli};
use streambox::core::{self, services::Services};

use anyhow::Result;
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration (CLI args, env vars and config file)
    let config = match core::config::Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Print error to stderr since logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match core::Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!("Starting StreamBox v{}", env!("CARGO_PKG_VERSION"));
    info!(
        timeout_ms = config.automation.overall_timeout_ms,
        headless = config.automation.headless,
        "Automation configuration"
    );

    let services = Services::from_config(&config)?;
    cli::run(cli.command, &services).await
}
