//! Source fetch error types
//!
//! Error definitions with transient/permanent classification for retry logic.

use thiserror::Error;

/// Error that can occur while reading from a remote source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The source kept signalling a rate limit after every allowed retry.
    #[error("rate limited by source after {attempts} attempts: {endpoint}")]
    RateLimited { endpoint: String, attempts: u32 },

    /// The source kept failing (non-2xx, network, malformed body) after every allowed retry.
    #[error("source unavailable after {attempts} attempts: {message}")]
    Unavailable {
        message: String,
        attempts: u32,
        status: Option<u16>,
    },

    /// A response or record could not be interpreted.
    #[error("malformed response: {message}")]
    Malformed { message: String },

    /// Source configuration is invalid (missing credentials, bad URL).
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// The collection has no endpoint configured.
    #[error("collection not supported by source: {collection}")]
    UnsupportedCollection { collection: String },
}

impl FetchError {
    /// Create a rate limited error.
    pub fn rate_limited(endpoint: impl Into<String>, attempts: u32) -> Self {
        FetchError::RateLimited {
            endpoint: endpoint.into(),
            attempts,
        }
    }

    /// Create an unavailable error.
    pub fn unavailable(message: impl Into<String>, attempts: u32, status: Option<u16>) -> Self {
        FetchError::Unavailable {
            message: message.into(),
            attempts,
            status,
        }
    }

    /// Create a malformed response error.
    pub fn malformed(message: impl Into<String>) -> Self {
        FetchError::Malformed {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        FetchError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Check if this error is transient and may succeed on a later run.
    /// Malformed bodies count as transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited { .. }
                | FetchError::Unavailable { .. }
                | FetchError::Malformed { .. }
        )
    }

    /// Check if this error requires configuration changes to resolve.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Get an error code for classification.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            FetchError::RateLimited { .. } => "RATE_LIMITED",
            FetchError::Unavailable { .. } => "SOURCE_UNAVAILABLE",
            FetchError::Malformed { .. } => "MALFORMED_RESPONSE",
            FetchError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            FetchError::UnsupportedCollection { .. } => "UNSUPPORTED_COLLECTION",
        }
    }
}

/// Result type for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::rate_limited("/leads", 6).is_transient());
        assert!(FetchError::unavailable("HTTP 503", 6, Some(503)).is_transient());
        assert!(FetchError::malformed("expected array").is_transient());

        assert!(FetchError::invalid_configuration("missing token").is_permanent());
        assert!(FetchError::UnsupportedCollection {
            collection: "opportunity".to_string()
        }
        .is_permanent());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(FetchError::rate_limited("/x", 1).error_code(), "RATE_LIMITED");
        assert_eq!(
            FetchError::unavailable("down", 1, None).error_code(),
            "SOURCE_UNAVAILABLE"
        );
        assert_eq!(
            FetchError::malformed("bad").error_code(),
            "MALFORMED_RESPONSE"
        );
    }

    #[test]
    fn test_error_display() {
        let err = FetchError::rate_limited("/leads?page=3", 6);
        assert_eq!(
            err.to_string(),
            "rate limited by source after 6 attempts: /leads?page=3"
        );

        let err = FetchError::unavailable("HTTP 502 Bad Gateway", 4, Some(502));
        assert!(err.to_string().contains("after 4 attempts"));
    }
}
