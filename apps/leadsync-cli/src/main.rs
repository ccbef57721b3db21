//! leadsync CLI - Run and administer CRM synchronization jobs
//!
//! This CLI enables operators to:
//! - Run a configured job, resuming from its checkpoint
//! - Inspect or clear a job's checkpoint
//! - Validate the configuration file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod error;
mod logging;

use config::{AppConfig, DEFAULT_CONFIG_PATH};
use error::CliResult;

/// leadsync CLI - Incremental CRM synchronization
#[derive(Parser)]
#[command(name = "leadsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, short, global = true, env = "LEADSYNC_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synchronization job
    Run(commands::run::RunArgs),

    /// Inspect or clear a job's checkpoint
    Checkpoint(commands::checkpoint::CheckpointArgs),

    /// Validate the configuration file
    Validate(commands::validate::ValidateArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = run(cli).await;

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            e.print();
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = AppConfig::load(&cli.config)?;
    logging::init_logging(&config.logging);

    match cli.command {
        Commands::Run(args) => commands::run::execute(&config, args).await,
        Commands::Checkpoint(args) => commands::checkpoint::execute(&config, args).await,
        Commands::Validate(args) => commands::validate::execute(&config, args),
    }
}
