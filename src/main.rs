use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tether::commands::{check, heartbeat, restore, service, stream, update, worker};
use tether::config::Config;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Stream channel and self-updater for a desktop AI helper", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: <config_dir>/tether/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the update server for a newer version
    Check,

    /// Download, verify and install the latest version
    Update,

    /// Copy a backup from an earlier update back over the installation
    Restore {
        /// Backup directory (absolute, or a name under the backup folder)
        backup: PathBuf,
    },

    /// Run a streaming task through the configured worker
    Stream {
        /// Task parameter passed to the worker (repeatable)
        #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = stream::parse_param)]
        params: Vec<(String, String)>,

        /// Continue an existing conversation instead of starting a review
        #[arg(long)]
        follow_up: bool,
    },

    /// Act as the worker for a task request (reference implementation)
    #[command(hide = true)]
    Worker {
        /// Path to the task request JSON file
        request: PathBuf,
    },

    /// Write the liveness heartbeat until interrupted
    Heartbeat,

    /// Run as the companion service until the host's heartbeat stops
    Service,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    if let Err(e) = tether::logging::init(&config.log_dir(), config.settings.debug_logging) {
        eprintln!("{} logging disabled: {e:#}", "warning:".yellow());
    }

    match cli.command {
        Commands::Check => check::execute(&config),
        Commands::Update => update::execute(&config),
        Commands::Restore { backup } => restore::execute(&config, &backup),
        Commands::Stream { params, follow_up } => stream::execute(&config, params, follow_up),
        Commands::Worker { request } => worker::execute(&request),
        Commands::Heartbeat => heartbeat::execute(&config),
        Commands::Service => service::execute(&config),
    }
}
