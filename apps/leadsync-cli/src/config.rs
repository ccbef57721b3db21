//! Application configuration.
//!
//! Loaded from a YAML file, then overridden from the environment. A `.env`
//! file in the working directory is read first.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use leadsync_connector::config::AuthConfig;
use leadsync_connector_rest::RestSourceConfig;
use leadsync_sync::checkpoint::CheckpointConfig;
use leadsync_sync::store::StoreKind;
use leadsync_sync::{StoreConfig, SyncConfig};

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "leadsync.yaml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {message}")]
    Io { path: String, message: String },

    #[error("invalid YAML: {0}")]
    Parse(String),

    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    UnknownJob(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Unknown log format: {s}")),
        }
    }
}

/// Logging section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info,leadsync=debug".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// The whole config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub source: RestSourceConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub jobs: Vec<SyncConfig>,
}

impl AppConfig {
    /// Load a config file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut config = Self::from_file(path)?;
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Parse a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse YAML text.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        if let Some(base_url) = lookup("LEADSYNC_BASE_URL") {
            self.source.base_url = base_url;
        }
        if let Some(token) = lookup("LEADSYNC_API_TOKEN") {
            self.source.auth = std::mem::take(&mut self.source.auth).with_secret(token);
        }
        if let Some(key) = lookup("LEADSYNC_API_KEY") {
            self.source.auth = match std::mem::take(&mut self.source.auth) {
                AuthConfig::None => AuthConfig::api_key(key),
                auth => auth.with_secret(key),
            };
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.store.database_url = Some(url);
        }
        if let Some(dir) = lookup("LEADSYNC_CHECKPOINT_DIR") {
            self.checkpoint = CheckpointConfig::File {
                dir: PathBuf::from(dir),
            };
        }
        if let Some(format) = lookup("LEADSYNC_LOG_FORMAT") {
            self.logging.format = format.parse().map_err(|message| ConfigError::InvalidValue {
                var: "LEADSYNC_LOG_FORMAT".to_string(),
                message,
            })?;
        }
        Ok(())
    }

    /// Validate every section without contacting the source or database.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.source
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("source: {e}")))?;
        self.store
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("store: {e}")))?;

        if matches!(self.checkpoint, CheckpointConfig::Postgres { .. })
            && self.store.kind != StoreKind::Postgres
        {
            return Err(ConfigError::Invalid(
                "checkpoint: the postgres backend needs the postgres store".to_string(),
            ));
        }

        if self.jobs.is_empty() {
            return Err(ConfigError::Invalid("no jobs configured".to_string()));
        }
        let mut names = BTreeSet::new();
        for job in &self.jobs {
            if !names.insert(job.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "job '{}' is defined twice",
                    job.name
                )));
            }
            job.validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }

    /// Look up a job by name.
    pub fn job(&self, name: &str) -> Result<&SyncConfig, ConfigError> {
        self.jobs
            .iter()
            .find(|job| job.name == name)
            .ok_or_else(|| ConfigError::UnknownJob(name.to_string()))
    }

    /// Source settings for one job; the job's retry budget wins.
    #[must_use]
    pub fn source_for(&self, job: &SyncConfig) -> RestSourceConfig {
        let mut source = self.source.clone();
        source.retry = source.retry.with_max_retries(job.settings.max_retries);
        source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const CONFIG: &str = r#"
source:
  base_url: https://crm.example.com/api/v1
  auth:
    type: query_token
    token: from-file
  endpoints:
    leads: /leads
    opportunities: /deals
    opportunity_detail: /deals/{id}
store:
  kind: memory
checkpoint:
  type: memory
jobs:
  - name: nightly
    settings:
      page_limit: 50
      max_retries: 2
    collections:
      - collection: lead
      - collection: opportunity
        stages: ["10", "20"]
        identity:
          type: matched
          direct_key: lead_id
          references:
            - type: canonical
              collection: lead
"#;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    // ===== Parsing =====

    #[test]
    fn test_parse_and_validate() {
        let config = AppConfig::from_yaml(CONFIG).unwrap();
        config.validate().unwrap();

        assert_eq!(config.logging.format, LogFormat::Pretty);
        let job = config.job("nightly").unwrap();
        assert_eq!(job.settings.page_limit, 50);
        assert_eq!(job.collections[1].stages, vec!["10", "20"]);
        assert!(job.collections[1].identity.is_matched());
    }

    #[test]
    fn test_unknown_job() {
        let config = AppConfig::from_yaml(CONFIG).unwrap();
        assert!(matches!(config.job("hourly"), Err(ConfigError::UnknownJob(_))));
    }

    #[test]
    fn test_job_retry_budget_applied_to_source() {
        let config = AppConfig::from_yaml(CONFIG).unwrap();
        let source = config.source_for(config.job("nightly").unwrap());
        assert_eq!(source.retry.max_retries, 2);
    }

    #[test]
    fn test_duplicate_job_names_rejected() {
        let mut config = AppConfig::from_yaml(CONFIG).unwrap();
        config.jobs.push(config.jobs[0].clone());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("defined twice"));
    }

    #[test]
    fn test_postgres_checkpoints_need_postgres_store() {
        let mut config = AppConfig::from_yaml(CONFIG).unwrap();
        config.checkpoint = CheckpointConfig::Postgres {
            table: "sync_checkpoints".to_string(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            AppConfig::from_yaml("source: ["),
            Err(ConfigError::Parse(_))
        ));
    }

    // ===== Environment =====

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::from_yaml(CONFIG).unwrap();
        config
            .apply_env_overrides(env(&[
                ("LEADSYNC_BASE_URL", "https://other.example.com"),
                ("LEADSYNC_API_TOKEN", "from-env"),
                ("DATABASE_URL", "postgres://u:p@db/leadsync"),
                ("LEADSYNC_CHECKPOINT_DIR", "/var/lib/leadsync"),
                ("LEADSYNC_LOG_FORMAT", "json"),
            ]))
            .unwrap();

        assert_eq!(config.source.base_url, "https://other.example.com");
        assert_eq!(config.source.auth, AuthConfig::query_token("from-env"));
        assert_eq!(
            config.store.database_url.as_deref(),
            Some("postgres://u:p@db/leadsync")
        );
        assert_eq!(
            config.checkpoint,
            CheckpointConfig::File {
                dir: PathBuf::from("/var/lib/leadsync")
            }
        );
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_api_key_env_without_configured_auth() {
        let mut config = AppConfig::from_yaml(CONFIG).unwrap();
        config.source.auth = AuthConfig::None;
        config
            .apply_env_overrides(env(&[("LEADSYNC_API_KEY", "k-123")]))
            .unwrap();
        assert_eq!(config.source.auth, AuthConfig::api_key("k-123"));
    }

    #[test]
    fn test_blank_env_ignored_and_bad_format_rejected() {
        let mut config = AppConfig::from_yaml(CONFIG).unwrap();
        config
            .apply_env_overrides(env(&[("LEADSYNC_BASE_URL", "  ")]))
            .unwrap();
        assert_eq!(config.source.base_url, "https://crm.example.com/api/v1");

        let err = config
            .apply_env_overrides(env(&[("LEADSYNC_LOG_FORMAT", "xml")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leadsync.yaml");
        std::fs::write(&path, CONFIG).unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.jobs.len(), 1);

        let missing = AppConfig::from_file(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
