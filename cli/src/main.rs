// relaynet: command-line driver for the relay network
//
// Runs random-walk simulations, inspects saved snapshots and manages the
// CLI configuration.

mod config;
mod simulate;
mod snapshot;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relaynet")]
#[command(about = "Relay and storage synchronization over a changing network", long_about = None)]
#[command(version)]
struct Cli {
    /// Write logs to daily files in this directory (overrides config)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a random-walk radio simulation
    Simulate {
        /// Ticks to run
        #[arg(short, long, default_value = "600")]
        ticks: u64,
        /// RNG seed for a reproducible run
        #[arg(short, long)]
        seed: Option<u64>,
        /// Print components every N ticks
        #[arg(short, long, default_value = "60")]
        report_every: u64,
        /// Save storages to the snapshot database when done
        #[arg(long)]
        save: bool,
    },
    /// Inspect saved snapshots
    Snapshot {
        /// Snapshot database (defaults to the configured path)
        #[arg(short, long)]
        path: Option<PathBuf>,
        #[command(subcommand)]
        action: SnapshotAction,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    List,
    Show {
        primary: i64,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

fn init_tracing(log_dir: Option<PathBuf>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "relaynet.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;

    let log_dir = cli.log_dir.or_else(|| config.log_dir.clone().map(PathBuf::from));
    let _guard = init_tracing(log_dir);

    match cli.command {
        Commands::Simulate {
            ticks,
            seed,
            report_every,
            save,
        } => {
            let options = simulate::Options {
                ticks,
                seed,
                report_every,
                save,
            };
            simulate::run(&config, options).await
        }
        Commands::Snapshot { path, action } => {
            let path = match path {
                Some(path) => path,
                None => config.snapshot_path()?,
            };
            match action {
                SnapshotAction::List => snapshot::list(&path),
                SnapshotAction::Show { primary, json } => snapshot::show(&path, primary, json),
            }
        }
        Commands::Config { action } => cmd_config(config, action),
    }
}

fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<26} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}
