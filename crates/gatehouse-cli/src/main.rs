//! gatehouse - RFID access gate controller
//!
//! Runs a gate on simulated hardware and operates on its offline queue.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// gatehouse - RFID access gate controller
#[derive(Parser, Debug)]
#[command(name = "gatehouse")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the gate configuration file
    #[arg(short, long, env = "GATEHOUSE_CONFIG", default_value = "gatehouse.toml")]
    config: PathBuf,

    /// Log level or filter directive (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gate; card reads are fed from stdin as `<reader_id> <uid-hex>`
    Run,

    /// Load and validate the configuration
    CheckConfig,

    /// Check once whether the broker endpoint is reachable
    Probe,

    /// Offline queue operations
    #[command(subcommand)]
    Queue(QueueCommands),
}

#[derive(Subcommand, Debug)]
enum QueueCommands {
    /// Show queue size and file location
    Status,

    /// List queued events, oldest first
    Show {
        /// Print the queue as JSON
        #[arg(long)]
        json: bool,
    },

    /// Drop every queued event
    Clear,

    /// Copy the queue to another file
    Export {
        /// Destination file
        path: PathBuf,
    },

    /// Connect to the broker and run one drain cycle
    Sync,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Run => commands::run::run(&cli.config),
        Commands::CheckConfig => commands::config::check(&cli.config),
        Commands::Probe => commands::config::probe(&cli.config),
        Commands::Queue(command) => match command {
            QueueCommands::Status => commands::queue::status(&cli.config),
            QueueCommands::Show { json } => commands::queue::show(&cli.config, json),
            QueueCommands::Clear => commands::queue::clear(&cli.config),
            QueueCommands::Export { path } => commands::queue::export(&cli.config, &path),
            QueueCommands::Sync => commands::queue::sync(&cli.config),
        },
    }
}
