//! Source configuration types
//!
//! Authentication and connection settings shared by source implementations.

use serde::{Deserialize, Serialize};

use crate::error::{FetchError, FetchResult};

const REDACTED: &str = "***REDACTED***";

/// Common connection settings shared across source types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Connection timeout in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Read timeout in seconds (whole request, body included).
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("leadsync/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_timeout_secs: default_connection_timeout(),
            read_timeout_secs: default_read_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl ConnectionSettings {
    /// Set both timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, connection_secs: u64, read_secs: u64) -> Self {
        self.connection_timeout_secs = connection_secs;
        self.read_timeout_secs = read_secs;
        self
    }
}

/// Authentication method configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No authentication.
    #[default]
    None,

    /// Basic authentication (username/password).
    Basic {
        username: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },

    /// API key sent in a request header.
    ApiKey {
        key: String,
        #[serde(default = "default_api_key_header")]
        header_name: String,
    },

    /// API token sent as a query parameter.
    QueryToken {
        token: String,
        #[serde(default = "default_query_token_param")]
        param_name: String,
    },

    /// Bearer token authentication.
    Bearer { token: String },
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

fn default_query_token_param() -> String {
    "token".to_string()
}

impl AuthConfig {
    /// Create basic authentication config.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        AuthConfig::Basic {
            username: username.into(),
            password: Some(password.into()),
        }
    }

    /// Create API key authentication config.
    pub fn api_key(key: impl Into<String>) -> Self {
        AuthConfig::ApiKey {
            key: key.into(),
            header_name: default_api_key_header(),
        }
    }

    /// Create query token authentication config.
    pub fn query_token(token: impl Into<String>) -> Self {
        AuthConfig::QueryToken {
            token: token.into(),
            param_name: default_query_token_param(),
        }
    }

    /// Create bearer token authentication config.
    pub fn bearer(token: impl Into<String>) -> Self {
        AuthConfig::Bearer {
            token: token.into(),
        }
    }

    /// Whether any credential is configured.
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, AuthConfig::None)
    }

    /// Replace the secret part, keeping the method.
    ///
    /// Used to inject credentials from the environment into a config file
    /// that only names the method.
    #[must_use]
    pub fn with_secret(self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        match self {
            AuthConfig::None => AuthConfig::Bearer { token: secret },
            AuthConfig::Basic { username, .. } => AuthConfig::Basic {
                username,
                password: Some(secret),
            },
            AuthConfig::ApiKey { header_name, .. } => AuthConfig::ApiKey {
                key: secret,
                header_name,
            },
            AuthConfig::QueryToken { param_name, .. } => AuthConfig::QueryToken {
                token: secret,
                param_name,
            },
            AuthConfig::Bearer { .. } => AuthConfig::Bearer { token: secret },
        }
    }

    /// Validate that the configured method carries a credential.
    pub fn validate(&self) -> FetchResult<()> {
        let missing = match self {
            AuthConfig::None => false,
            AuthConfig::Basic { username, password } => {
                username.trim().is_empty() || password.as_deref().unwrap_or("").is_empty()
            }
            AuthConfig::ApiKey { key, header_name } => {
                key.trim().is_empty() || header_name.trim().is_empty()
            }
            AuthConfig::QueryToken { token, param_name } => {
                token.trim().is_empty() || param_name.trim().is_empty()
            }
            AuthConfig::Bearer { token } => token.trim().is_empty(),
        };

        if missing {
            return Err(FetchError::invalid_configuration(
                "source credentials are missing",
            ));
        }
        Ok(())
    }

    /// Create a redacted version.
    #[must_use]
    pub fn redacted(&self) -> Self {
        match self {
            AuthConfig::None => AuthConfig::None,
            AuthConfig::Basic { username, .. } => AuthConfig::Basic {
                username: username.clone(),
                password: Some(REDACTED.to_string()),
            },
            AuthConfig::ApiKey { header_name, .. } => AuthConfig::ApiKey {
                key: REDACTED.to_string(),
                header_name: header_name.clone(),
            },
            AuthConfig::QueryToken { param_name, .. } => AuthConfig::QueryToken {
                token: REDACTED.to_string(),
                param_name: param_name.clone(),
            },
            AuthConfig::Bearer { .. } => AuthConfig::Bearer {
                token: REDACTED.to_string(),
            },
        }
    }
}
