//! Stratum CLI Binary
//!
//! Command-line interface over a stratum object store.

use anyhow::{anyhow, Context};
use clap::Parser;
use stratum::cli::{map_error, Cli, RunContext};
use stratum::logging::init_logging;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = RunContext::resolve_config(&cli).map_err(|e| anyhow!(map_error(&e)))?;
    init_logging(Some(&config.logging)).context("Failed to initialize logging")?;
    info!(store = %config.store.path.display(), "Stratum CLI starting");

    let run = RunContext::with_config(config).map_err(|e| {
        error!("Error opening store: {}", e);
        anyhow!(map_error(&e))
    })?;

    let outcome = run.execute(&cli.command);
    let shutdown = run.shutdown();
    match outcome {
        Ok(output) => {
            info!("Command completed successfully");
            println!("{}", output);
        }
        Err(e) => {
            error!("Command failed: {}", e);
            return Err(anyhow!(map_error(&e)));
        }
    }
    shutdown.map_err(|e| anyhow!(map_error(&e)))
}
