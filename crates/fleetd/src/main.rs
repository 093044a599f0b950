//! fleetd — the runnerfleet daemon.
//!
//! Single binary that runs one worker pool:
//! - State store (redb)
//! - Message listener (session lease + queue polling)
//! - Reconciler (pod creation and scale-down)
//!
//! # Usage
//!
//! ```text
//! fleetd run --config /etc/runnerfleet/fleet.toml
//! fleetd check --config fleet.toml
//! ```

mod config;
mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::FleetConfig;

const DEFAULT_FILTER: &str = "info,fleetd=debug,runnerfleet_listener=debug,runnerfleet_autoscale=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "runnerfleet daemon", version)]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for jobs and scale the pool until interrupted.
    Run {
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,

        /// Personal access token. Overrides `github.token`.
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// Load and validate the configuration, then exit.
    Check {
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run { config, token } => {
            let mut config = FleetConfig::from_file(&config)?;
            if let Some(token) = token.filter(|t| !t.is_empty()) {
                config.github.token = Some(token);
            }
            config.validate()?;
            daemon::run(config).await
        }
        Command::Check { config: path } => {
            let config = FleetConfig::from_file(&path)?;
            config.validate()?;
            info!(path = %path.display(), pool = %config.pool.name, "configuration is valid");
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
