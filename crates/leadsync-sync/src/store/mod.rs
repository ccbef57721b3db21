//! Canonical store.
//!
//! The reconciled target table, keyed by `(collection, id)`.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::{connect_pool, PgCanonicalStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use leadsync_connector::types::CollectionType;

use crate::reconcile::CanonicalCandidate;

/// A reconciled row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Primary key within the collection.
    pub id: i64,
    pub collection: CollectionType,
    /// Id of the source item last written here.
    pub source_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub fields: BTreeMap<String, Value>,
    /// SHA-256 of `fields`.
    pub fingerprint: String,
    /// How the id was established when it was not the source id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_from: Option<String>,
    #[serde(default)]
    pub source_created_at: Option<DateTime<Utc>>,
    /// Last known source modification instant.
    #[serde(default)]
    pub source_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
}

impl CanonicalRecord {
    /// Build the row written for a candidate.
    #[must_use]
    pub fn from_candidate(candidate: CanonicalCandidate, synced_at: DateTime<Utc>) -> Self {
        Self {
            id: candidate.id,
            collection: candidate.collection,
            source_id: candidate.source_id,
            stage: candidate.stage,
            fields: candidate.fields,
            fingerprint: candidate.fingerprint,
            resolved_from: candidate.resolved_from,
            source_created_at: candidate.source_created_at,
            source_updated_at: candidate.source_updated_at,
            synced_at: Some(synced_at),
        }
    }
}

/// Canonical store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Primary key already taken.
    #[error("Record {collection}/{id} already exists")]
    Conflict { collection: CollectionType, id: i64 },

    /// Update target missing.
    #[error("Record {collection}/{id} not found")]
    NotFound { collection: CollectionType, id: i64 },

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Call exceeded its timeout.
    #[error("Store operation '{operation}' timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// Row could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid store configuration.
    #[error("Invalid store configuration: {0}")]
    Configuration(String),
}

impl StoreError {
    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs,
        }
    }

    /// Check if a later attempt may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Timeout { .. })
    }

    /// Check if this is a primary key conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// The canonical store seam. Every call is a network round trip with its
/// own timeout; callers never retry beyond the reconciler's single
/// insert-to-update fallback.
#[async_trait]
pub trait CanonicalStore: Send + Sync {
    /// Verify the store is reachable and its schema exists.
    async fn health_check(&self) -> StoreResult<()>;

    /// Select by primary key.
    async fn get(&self, collection: CollectionType, id: i64) -> StoreResult<Option<CanonicalRecord>>;

    /// Select many by primary key. Missing ids are absent from the map.
    async fn get_many(
        &self,
        collection: CollectionType,
        ids: &[i64],
    ) -> StoreResult<HashMap<i64, CanonicalRecord>> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get(collection, *id).await? {
                found.insert(*id, record);
            }
        }
        Ok(found)
    }

    /// Insert a new row. Fails with [`StoreError::Conflict`] if the key exists.
    async fn insert(&self, record: &CanonicalRecord) -> StoreResult<()>;

    /// Overwrite every column of an existing row.
    async fn update(&self, record: &CanonicalRecord) -> StoreResult<()>;

    /// Every row of a collection, ordered by id.
    async fn list_collection(&self, collection: CollectionType) -> StoreResult<Vec<CanonicalRecord>>;
}

/// Canonical store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Postgres,
    Memory,
}

/// Canonical store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    /// Connection URL; usually supplied through `DATABASE_URL`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Timeout applied to every store call.
    #[serde(default = "default_statement_timeout_secs")]
    pub statement_timeout_secs: u64,
}

fn default_schema() -> String {
    "leadsync".to_string()
}

fn default_table() -> String {
    "canonical_records".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_statement_timeout_secs() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            database_url: None,
            schema: default_schema(),
            table: default_table(),
            max_connections: default_max_connections(),
            statement_timeout_secs: default_statement_timeout_secs(),
        }
    }
}

impl StoreConfig {
    /// In-memory store.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            kind: StoreKind::Memory,
            ..Self::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> StoreResult<()> {
        if self.kind == StoreKind::Memory {
            return Ok(());
        }
        if self
            .database_url
            .as_deref()
            .map_or(true, |url| url.trim().is_empty())
        {
            return Err(StoreError::Configuration(
                "database_url is required for the postgres store".to_string(),
            ));
        }
        for (name, value) in [("schema", &self.schema), ("table", &self.table)] {
            if value.trim().is_empty() {
                return Err(StoreError::Configuration(format!("{name} must not be empty")));
            }
        }
        if self.max_connections == 0 || self.statement_timeout_secs == 0 {
            return Err(StoreError::Configuration(
                "max_connections and statement_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Connection URL with credentials masked.
    #[must_use]
    pub fn redacted_url(&self) -> String {
        self.database_url
            .as_deref()
            .map(redact_url)
            .unwrap_or_default()
    }
}

fn redact_url(raw: &str) -> String {
    match (raw.find("://"), raw.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            format!("{}://***REDACTED***{}", &raw[..scheme], &raw[at..])
        }
        _ => raw.to_string(),
    }
}
