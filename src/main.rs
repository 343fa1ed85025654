use clap::Parser;
use std::time::Duration;
use tracing::error;

use botfleet::cli::{self, Cli, Commands, RunOptions};
use botfleet::config::FleetConfig;
use botfleet::error::Result;
use botfleet::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = FleetConfig::load_from(&cli.config_dir)?;

    match cli.command {
        Commands::CheckConfig => cli::check_config(&config),
        Commands::Run {
            world,
            latency_ms,
            watch_ui,
            drain_ms,
        } => {
            let _guard = init_logging(&config.logging)?;
            let options = RunOptions {
                world,
                latency: Duration::from_millis(latency_ms),
                watch_ui,
                drain: Duration::from_millis(drain_ms),
            };
            if let Err(e) = cli::run(config, options).await {
                error!(error = %e, "fleet exited with error");
                return Err(e);
            }
            Ok(())
        }
    }
}
