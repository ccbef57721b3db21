//! Sync error types.

use thiserror::Error;

use leadsync_connector::error::FetchError;

use crate::checkpoint::CheckpointError;
use crate::store::StoreError;

/// Errors that can stop a synchronization run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Source error after the fetcher exhausted its retries.
    #[error("Source error: {0}")]
    Fetch(#[from] FetchError),

    /// Canonical store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Checkpoint persistence error.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Job not found in configuration.
    #[error("Job not found: {name}")]
    JobNotFound { name: String },

    /// Invalid state transition.
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a job not found error.
    pub fn job_not_found(name: impl Into<String>) -> Self {
        Self::JobNotFound { name: name.into() }
    }

    /// Create an invalid state transition error.
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if a later run may succeed without operator intervention.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_transient(),
            Self::Store(e) => e.is_transient(),
            Self::Checkpoint(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Check if this error must stop the run before any page is fetched.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = SyncError::configuration("page_limit must be positive");
        assert!(matches!(err, SyncError::Configuration { .. }));
        assert_eq!(
            err.to_string(),
            "Configuration error: page_limit must be positive"
        );

        let err = SyncError::job_not_found("nightly");
        assert_eq!(err.to_string(), "Job not found: nightly");

        let err = SyncError::invalid_transition("Idle", "Reconciling");
        assert_eq!(
            err.to_string(),
            "Invalid state transition from Idle to Reconciling"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(SyncError::from(FetchError::rate_limited("/leads", 6)).is_retryable());
        assert!(SyncError::from(StoreError::timeout("select", 5)).is_retryable());
        assert!(SyncError::from(CheckpointError::Io("disk full".to_string())).is_retryable());

        assert!(SyncError::from(FetchError::invalid_configuration("no token")).is_fatal());
        assert!(SyncError::configuration("bad").is_fatal());
        assert!(SyncError::internal("bug").is_fatal());
    }
}
