//! Validate command - Check the configuration without contacting anything

use clap::Args;

use crate::config::AppConfig;
use crate::error::CliResult;

/// Arguments for the validate command
#[derive(Args)]
pub struct ValidateArgs {
    /// Print the effective configuration with secrets redacted
    #[arg(long)]
    pub show: bool,
}

/// Execute the validate command
pub fn execute(config: &AppConfig, args: ValidateArgs) -> CliResult<()> {
    config.validate()?;

    println!("Configuration is valid.");
    println!("  source: {}", config.source.base_url);
    println!("  store: {:?}", config.store.kind);
    for job in &config.jobs {
        let collections: Vec<String> = job
            .collections
            .iter()
            .map(|plan| {
                if plan.stages.is_empty() {
                    plan.collection.to_string()
                } else {
                    format!("{} ({} stages)", plan.collection, plan.stages.len())
                }
            })
            .collect();
        println!("  job '{}': {}", job.name, collections.join(", "));
    }

    if args.show {
        println!("\n{:#?}", config.source.redacted());
        println!("store url: {}", config.store.redacted_url());
    }
    Ok(())
}
