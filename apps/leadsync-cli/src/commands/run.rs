//! Run command - Execute one synchronization job

use clap::Args;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use leadsync_connector_rest::RestSource;
use leadsync_sync::{RunOptions, SyncOrchestrator};

use crate::commands::Backends;
use crate::config::AppConfig;
use crate::error::{CliError, CliResult};

/// Arguments for the run command
#[derive(Args)]
pub struct RunArgs {
    /// Job name from the config file
    #[arg(long, short)]
    pub job: String,

    /// Run outside the job's schedule window
    #[arg(long)]
    pub force: bool,

    /// Decide without writing records or checkpoints
    #[arg(long)]
    pub dry_run: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the run command
pub async fn execute(config: &AppConfig, args: RunArgs) -> CliResult<()> {
    config.validate()?;
    let job = config.job(&args.job)?.clone();

    let source = RestSource::new(config.source_for(&job))
        .map_err(|e| CliError::Config(format!("source: {e}")))?;
    let backends = Backends::connect(config).await?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping at the next page boundary");
                cancel.cancel();
            }
        }
    });

    let orchestrator = SyncOrchestrator::new(
        Arc::new(job),
        Arc::new(source),
        backends.store,
        backends.checkpoints,
    )
    .with_cancellation(cancel);

    let report = orchestrator
        .run(RunOptions {
            force: args.force,
            dry_run: args.dry_run,
        })
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_table());
    }

    match report.abort_reason {
        Some(reason) => Err(CliError::aborted(reason, report.abort_message.as_deref())),
        None => Ok(()),
    }
}
