//! Incident sender binary.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use incsender::{scheduler, Cli, Collector, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = incsender::logging::init(cli.verbose, cli.log_dir.as_deref())?;

    let config = Config::from_cli(cli).context("Invalid configuration")?;
    info!(
        host = %config.host,
        schedule_secs = config.schedule.as_secs(),
        lookback_minutes = config.lookback.num_minutes(),
        filter = %config.filter.mode,
        sinks = config.sinks.enabled_count(),
        once = config.once,
        "Starting incident sender"
    );

    let mut collector = Collector::from_config(&config).context("Failed to initialize collector")?;
    scheduler::run(&mut collector, config.schedule, config.once).await;

    Ok(())
}
