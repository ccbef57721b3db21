//! Checkpoint command - Inspect or reset a job's resume state

use clap::{Args, Subcommand};

use crate::commands::open_checkpoint_store;
use crate::config::AppConfig;
use crate::error::CliResult;

/// Arguments for the checkpoint command
#[derive(Args)]
pub struct CheckpointArgs {
    #[command(subcommand)]
    pub command: CheckpointCommands,
}

#[derive(Subcommand)]
pub enum CheckpointCommands {
    /// Print the stored checkpoint of a job
    Show {
        /// Job name
        job: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete the stored checkpoint so the next run starts from page zero
    Clear {
        /// Job name
        job: String,
    },
}

/// Execute the checkpoint command
pub async fn execute(config: &AppConfig, args: CheckpointArgs) -> CliResult<()> {
    let store = open_checkpoint_store(config).await?;

    match args.command {
        CheckpointCommands::Show { job, json } => {
            config.job(&job)?;
            let checkpoint = store.load(&job).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&checkpoint)?);
                return Ok(());
            }
            if checkpoint.is_fresh() {
                println!("No checkpoint for job '{job}'; the next run starts from page 0.");
                return Ok(());
            }

            println!("Checkpoint for job '{job}'");
            if let Some(updated_at) = checkpoint.updated_at {
                println!("  updated: {}", updated_at.to_rfc3339());
            }
            println!(
                "  committed: {} pages, {} records",
                checkpoint.counts_so_far.pages, checkpoint.counts_so_far.processed
            );
            for (key, cursor) in &checkpoint.stages {
                let state = if cursor.completed {
                    "completed".to_string()
                } else {
                    format!("next page {}", cursor.next_page)
                };
                println!("  {key:<28} {state}");
            }
            Ok(())
        }
        CheckpointCommands::Clear { job } => {
            config.job(&job)?;
            store.clear(&job).await?;
            println!("Checkpoint for job '{job}' cleared.");
            Ok(())
        }
    }
}
