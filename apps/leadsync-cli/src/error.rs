//! CLI error types and exit codes

use thiserror::Error;

use leadsync_sync::{AbortReason, SyncError};

use crate::config::ConfigError;

/// Exit codes for the CLI
/// - 0: Completed, or skipped outside the schedule window
/// - 1: General or I/O error
/// - 2: Configuration error (nothing was fetched)
/// - 3: Source aborted the run (checkpoint kept)
/// - 4: Canonical or checkpoint store error
/// - 5: Deadline exceeded or cancelled (checkpoint kept)
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Source aborted the run: {0}")]
    Upstream(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Run interrupted: {0}")]
    Interrupted(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CliError {
    /// Map an aborted run to its exit category.
    pub fn aborted(reason: AbortReason, message: Option<&str>) -> Self {
        let message = match message {
            Some(message) => format!("{reason}: {message}"),
            None => reason.to_string(),
        };
        match reason {
            AbortReason::RateLimited | AbortReason::Unavailable => CliError::Upstream(message),
            AbortReason::Store | AbortReason::Checkpoint => CliError::Store(message),
            AbortReason::DeadlineExceeded | AbortReason::Cancelled => {
                CliError::Interrupted(message)
            }
            AbortReason::Internal => CliError::Internal(message),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Io(_) | CliError::Internal(_) => 1,
            CliError::Config(_) | CliError::UnknownJob(_) => 2,
            CliError::Upstream(_) => 3,
            CliError::Store(_) => 4,
            CliError::Interrupted(_) => 5,
        }
    }

    /// Print the error to stderr with appropriate formatting
    pub fn print(&self) {
        let use_color = std::env::var("NO_COLOR").is_err();

        if use_color {
            eprintln!("\x1b[31mError:\x1b[0m {self}");
        } else {
            eprintln!("Error: {self}");
        }

        if let Some(suggestion) = self.suggestion() {
            if use_color {
                eprintln!("\n\x1b[33mSuggestion:\x1b[0m {suggestion}");
            } else {
                eprintln!("\nSuggestion: {suggestion}");
            }
        }
    }

    /// Get a suggested action for this error
    fn suggestion(&self) -> Option<&'static str> {
        match self {
            CliError::Config(_) => Some("Run 'leadsync validate' to check the configuration."),
            CliError::UnknownJob(_) => Some("Check the job names under 'jobs' in the config file."),
            CliError::Upstream(_) | CliError::Interrupted(_) => {
                Some("The checkpoint was kept; the next run resumes from the last committed page.")
            }
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Io { .. } => CliError::Io(e.to_string()),
            ConfigError::UnknownJob(name) => CliError::UnknownJob(name),
            _ => CliError::Config(e.to_string()),
        }
    }
}

impl From<SyncError> for CliError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Configuration { .. } | SyncError::InvalidStateTransition { .. } => {
                CliError::Config(e.to_string())
            }
            SyncError::JobNotFound { name } => CliError::UnknownJob(name),
            SyncError::Fetch(_) => CliError::Upstream(e.to_string()),
            SyncError::Store(_) | SyncError::Checkpoint(_) => CliError::Store(e.to_string()),
            SyncError::Serialization(_) | SyncError::Internal { .. } => {
                CliError::Internal(e.to_string())
            }
        }
    }
}

impl From<leadsync_sync::store::StoreError> for CliError {
    fn from(e: leadsync_sync::store::StoreError) -> Self {
        CliError::Store(e.to_string())
    }
}

impl From<leadsync_sync::checkpoint::CheckpointError> for CliError {
    fn from(e: leadsync_sync::checkpoint::CheckpointError) -> Self {
        CliError::Store(e.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Internal(format!("JSON error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_exit_codes() {
        assert_eq!(CliError::aborted(AbortReason::RateLimited, None).exit_code(), 3);
        assert_eq!(CliError::aborted(AbortReason::Unavailable, None).exit_code(), 3);
        assert_eq!(CliError::aborted(AbortReason::Store, None).exit_code(), 4);
        assert_eq!(CliError::aborted(AbortReason::Checkpoint, None).exit_code(), 4);
        assert_eq!(CliError::aborted(AbortReason::DeadlineExceeded, None).exit_code(), 5);
        assert_eq!(CliError::aborted(AbortReason::Cancelled, None).exit_code(), 5);
        assert_eq!(CliError::aborted(AbortReason::Internal, None).exit_code(), 1);
    }

    #[test]
    fn test_abort_message() {
        let err = CliError::aborted(AbortReason::RateLimited, Some("GET /leads"));
        assert_eq!(err.to_string(), "Source aborted the run: rate_limited: GET /leads");
    }

    #[test]
    fn test_sync_error_mapping() {
        assert_eq!(CliError::from(SyncError::configuration("bad")).exit_code(), 2);
        assert_eq!(CliError::from(SyncError::job_not_found("x")).exit_code(), 2);
        assert_eq!(CliError::from(SyncError::internal("boom")).exit_code(), 1);
    }
}
