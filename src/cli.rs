use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::bot::{GameClient, SimulatedGameClient};
use crate::bus::topic::UI_ALL;
use crate::bus::{ChannelSubscriber, Payload};
use crate::config::{BotSpec, FleetConfig};
use crate::error::{FleetError, Result};
use crate::fleet::Fleet;
use crate::orchestrator::{Command, CommandError, CommandResponse};
use crate::world::WorldData;

#[derive(Parser)]
#[command(name = "botfleet")]
#[command(version = "0.1.0")]
#[command(about = "Coordination core for a fleet of game bots", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and environment overrides
    #[arg(short, long, default_value = "config", env = "BOTFLEET_CONFIG_DIR")]
    pub config_dir: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the fleet; commands are read from stdin as JSON lines
    Run {
        /// World data file ({"entities": [...]})
        #[arg(short, long)]
        world: Option<PathBuf>,

        /// Latency of the simulated game API (ms)
        #[arg(long, default_value = "50")]
        latency_ms: u64,

        /// Echo ui.* events to stdout
        #[arg(long)]
        watch_ui: bool,

        /// How long to wait for outstanding tasks once stdin closes (ms)
        #[arg(long, default_value = "60000")]
        drain_ms: u64,
    },
    /// Validate the configuration and print the effective values as TOML
    CheckConfig,
}

pub struct RunOptions {
    pub world: Option<PathBuf>,
    pub latency: Duration,
    pub watch_ui: bool,
    pub drain: Duration,
}

/// Start the fleet and serve the stdin control loop until EOF or ctrl-c
pub async fn run(config: FleetConfig, options: RunOptions) -> Result<()> {
    let world = match &options.world {
        Some(path) => WorldData::load(path)?,
        None => WorldData::empty(),
    };
    info!(entities = world.len(), "world data loaded");

    let latency = options.latency;
    let fleet = Fleet::start(config, Arc::new(world), move |spec: &BotSpec| {
        info!(bot_id = %spec.id, latency_ms = latency.as_millis() as u64, "simulated game client");
        Arc::new(SimulatedGameClient::new(latency)) as Arc<dyn GameClient>
    })
    .await?;

    if options.watch_ui {
        let (subscriber, mut rx) = ChannelSubscriber::new("cli-ui");
        fleet.bus().subscribe(UI_ALL, subscriber).await?;
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&envelope) {
                    println!("{}", line);
                }
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                break;
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim().is_empty() => continue,
                    Some(line) => {
                        let response = handle_line(&fleet, &line).await?;
                        let mut out = serde_json::to_vec(&response)?;
                        out.push(b'\n');
                        stdout.write_all(&out).await?;
                        stdout.flush().await?;
                    }
                    None => {
                        info!("stdin closed, waiting for outstanding tasks");
                        if let Err(e) = fleet.wait_idle(options.drain).await {
                            warn!(error = %e, "shutting down with outstanding tasks");
                        }
                        break;
                    }
                }
            }
        }
    }

    fleet.shutdown().await;
    Ok(())
}

async fn handle_line(fleet: &Fleet, line: &str) -> Result<CommandResponse> {
    match serde_json::from_str::<Command>(line) {
        Ok(command) => fleet.submit(command).await,
        // Malformed input never reaches the bus; answer locally
        Err(e) => Ok(CommandResponse::Rejected {
            in_reply_to: uuid::Uuid::nil(),
            error: CommandError::Malformed {
                reason: e.to_string(),
            },
        }),
    }
}

/// Print the effective configuration, failing on validation errors
pub fn check_config(config: &FleetConfig) -> Result<()> {
    config
        .validate()
        .map_err(|errors| FleetError::InvalidConfig(errors.join("; ")))?;
    let rendered = toml::to_string_pretty(config)
        .map_err(|e| FleetError::Internal(format!("render config: {e}")))?;
    print!("{}", rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_arguments() {
        let cli = Cli::try_parse_from([
            "botfleet",
            "--config-dir",
            "conf",
            "run",
            "--latency-ms",
            "5",
            "--watch-ui",
        ])
        .unwrap();
        assert_eq!(cli.config_dir, PathBuf::from("conf"));
        match cli.command {
            Commands::Run {
                latency_ms,
                watch_ui,
                world,
                drain_ms,
            } => {
                assert_eq!(latency_ms, 5);
                assert!(watch_ui);
                assert!(world.is_none());
                assert_eq!(drain_ms, 60_000);
            }
            Commands::CheckConfig => panic!("expected run"),
        }
    }

    #[test]
    fn test_check_config_rejects_invalid() {
        let mut config = FleetConfig::default();
        config.mailbox.bank_capacity = 0;
        assert!(matches!(
            check_config(&config),
            Err(FleetError::InvalidConfig(_))
        ));
    }
}
