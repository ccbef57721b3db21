//! PostgreSQL canonical store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, instrument};

use leadsync_connector::types::CollectionType;

use super::{CanonicalRecord, CanonicalStore, StoreConfig, StoreError, StoreResult};

/// PostgreSQL `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// Open a connection pool for the configured database.
pub async fn connect_pool(config: &StoreConfig) -> StoreResult<PgPool> {
    config.validate()?;
    let url = config.database_url.as_deref().unwrap_or_default();

    debug!(url = %config.redacted_url(), "Creating database connection pool");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.statement_timeout_secs))
        .connect(url)
        .await
        .map_err(|e| {
            StoreError::Database(format!(
                "failed to connect to {}: {e}",
                config.redacted_url()
            ))
        })?;

    info!(url = %config.redacted_url(), "Database connection pool established");
    Ok(pool)
}

/// Canonical store over one PostgreSQL table.
#[derive(Debug, Clone)]
pub struct PgCanonicalStore {
    pool: PgPool,
    /// Quoted `"schema"."table"`.
    qualified_table: String,
    schema: String,
    timeout: Duration,
}

impl PgCanonicalStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub fn new(pool: PgPool, config: &StoreConfig) -> Self {
        Self {
            pool,
            qualified_table: format!(
                "\"{}\".\"{}\"",
                escape_identifier(&config.schema),
                escape_identifier(&config.table)
            ),
            schema: config.schema.clone(),
            timeout: Duration::from_secs(config.statement_timeout_secs),
        }
    }

    /// Create the schema and table if missing.
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        let create_schema = format!(
            "CREATE SCHEMA IF NOT EXISTS \"{}\"",
            escape_identifier(&self.schema)
        );
        let create_table = format!(
            r"
            CREATE TABLE IF NOT EXISTS {} (
                collection TEXT NOT NULL,
                id BIGINT NOT NULL,
                source_id BIGINT NOT NULL,
                stage TEXT,
                fields JSONB NOT NULL,
                fingerprint TEXT NOT NULL,
                resolved_from TEXT,
                source_created_at TIMESTAMPTZ,
                source_updated_at TIMESTAMPTZ,
                synced_at TIMESTAMPTZ,
                PRIMARY KEY (collection, id)
            )
            ",
            self.qualified_table
        );

        self.timed("create_schema", sqlx::query(&create_schema).execute(&self.pool))
            .await?;
        self.timed("create_table", sqlx::query(&create_table).execute(&self.pool))
            .await?;
        Ok(())
    }

    async fn timed<T, F>(&self, operation: &str, call: F) -> StoreResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(|e| StoreError::Database(e.to_string())),
            Err(_) => Err(StoreError::timeout(operation, self.timeout.as_secs())),
        }
    }

    fn select_columns() -> &'static str {
        "collection, id, source_id, stage, fields, fingerprint, resolved_from, \
         source_created_at, source_updated_at, synced_at"
    }
}

#[async_trait]
impl CanonicalStore for PgCanonicalStore {
    async fn health_check(&self) -> StoreResult<()> {
        let query = format!("SELECT 1 FROM {} LIMIT 1", self.qualified_table);
        self.timed("health_check", sqlx::query(&query).fetch_optional(&self.pool))
            .await?;
        Ok(())
    }

    async fn get(&self, collection: CollectionType, id: i64) -> StoreResult<Option<CanonicalRecord>> {
        let query = format!(
            "SELECT {} FROM {} WHERE collection = $1 AND id = $2",
            Self::select_columns(),
            self.qualified_table
        );
        let row = self
            .timed(
                "select",
                sqlx::query_as::<_, CanonicalRow>(&query)
                    .bind(collection.as_str())
                    .bind(id)
                    .fetch_optional(&self.pool),
            )
            .await?;

        row.map(CanonicalRow::into_record).transpose()
    }

    async fn get_many(
        &self,
        collection: CollectionType,
        ids: &[i64],
    ) -> StoreResult<HashMap<i64, CanonicalRecord>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let query = format!(
            "SELECT {} FROM {} WHERE collection = $1 AND id = ANY($2)",
            Self::select_columns(),
            self.qualified_table
        );
        let rows = self
            .timed(
                "select_many",
                sqlx::query_as::<_, CanonicalRow>(&query)
                    .bind(collection.as_str())
                    .bind(ids)
                    .fetch_all(&self.pool),
            )
            .await?;

        rows.into_iter()
            .map(|row| row.into_record().map(|r| (r.id, r)))
            .collect()
    }

    async fn insert(&self, record: &CanonicalRecord) -> StoreResult<()> {
        let fields = serde_json::to_value(&record.fields)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let query = format!(
            r"
            INSERT INTO {} ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
            self.qualified_table,
            Self::select_columns()
        );

        let call = sqlx::query(&query)
            .bind(record.collection.as_str())
            .bind(record.id)
            .bind(record.source_id)
            .bind(&record.stage)
            .bind(&fields)
            .bind(&record.fingerprint)
            .bind(&record.resolved_from)
            .bind(record.source_created_at)
            .bind(record.source_updated_at)
            .bind(record.synced_at)
            .execute(&self.pool);

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(sqlx::Error::Database(db))) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(StoreError::Conflict {
                    collection: record.collection,
                    id: record.id,
                })
            }
            Ok(Err(e)) => Err(StoreError::Database(e.to_string())),
            Err(_) => Err(StoreError::timeout("insert", self.timeout.as_secs())),
        }
    }

    async fn update(&self, record: &CanonicalRecord) -> StoreResult<()> {
        let fields = serde_json::to_value(&record.fields)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let query = format!(
            r"
            UPDATE {}
            SET source_id = $3, stage = $4, fields = $5, fingerprint = $6,
                resolved_from = $7, source_created_at = $8,
                source_updated_at = $9, synced_at = $10
            WHERE collection = $1 AND id = $2
            ",
            self.qualified_table
        );

        let result = self
            .timed(
                "update",
                sqlx::query(&query)
                    .bind(record.collection.as_str())
                    .bind(record.id)
                    .bind(record.source_id)
                    .bind(&record.stage)
                    .bind(&fields)
                    .bind(&record.fingerprint)
                    .bind(&record.resolved_from)
                    .bind(record.source_created_at)
                    .bind(record.source_updated_at)
                    .bind(record.synced_at)
                    .execute(&self.pool),
            )
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                collection: record.collection,
                id: record.id,
            });
        }
        Ok(())
    }

    async fn list_collection(&self, collection: CollectionType) -> StoreResult<Vec<CanonicalRecord>> {
        let query = format!(
            "SELECT {} FROM {} WHERE collection = $1 ORDER BY id",
            Self::select_columns(),
            self.qualified_table
        );
        let rows = self
            .timed(
                "list",
                sqlx::query_as::<_, CanonicalRow>(&query)
                    .bind(collection.as_str())
                    .fetch_all(&self.pool),
            )
            .await?;

        rows.into_iter().map(CanonicalRow::into_record).collect()
    }
}

/// Escape a SQL identifier for use inside double quotes.
fn escape_identifier(identifier: &str) -> String {
    identifier.replace('"', "\"\"")
}

#[derive(sqlx::FromRow)]
struct CanonicalRow {
    collection: String,
    id: i64,
    source_id: i64,
    stage: Option<String>,
    fields: serde_json::Value,
    fingerprint: String,
    resolved_from: Option<String>,
    source_created_at: Option<DateTime<Utc>>,
    source_updated_at: Option<DateTime<Utc>>,
    synced_at: Option<DateTime<Utc>>,
}

impl CanonicalRow {
    fn into_record(self) -> StoreResult<CanonicalRecord> {
        let collection = self
            .collection
            .parse()
            .map_err(StoreError::Serialization)?;
        let fields = serde_json::from_value(self.fields)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(CanonicalRecord {
            id: self.id,
            collection,
            source_id: self.source_id,
            stage: self.stage,
            fields,
            fingerprint: self.fingerprint,
            resolved_from: self.resolved_from,
            source_created_at: self.source_created_at,
            source_updated_at: self.source_updated_at,
            synced_at: self.synced_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_identifier() {
        assert_eq!(escape_identifier("canonical_records"), "canonical_records");
        assert_eq!(escape_identifier("we\"ird"), "we\"\"ird");
    }

    #[test]
    fn test_row_into_record() {
        let row = CanonicalRow {
            collection: "opportunity".to_string(),
            id: 5,
            source_id: 77,
            stage: Some("10".to_string()),
            fields: serde_json::json!({"title": "Deal", "value": 10.0}),
            fingerprint: "abc".to_string(),
            resolved_from: Some("direct:lead_id".to_string()),
            source_created_at: None,
            source_updated_at: None,
            synced_at: None,
        };
        let record = row.into_record().unwrap();
        assert_eq!(record.collection, CollectionType::Opportunity);
        assert_eq!(record.fields["title"], serde_json::json!("Deal"));
    }

    #[test]
    fn test_row_with_unknown_collection_fails() {
        let row = CanonicalRow {
            collection: "invoice".to_string(),
            id: 1,
            source_id: 1,
            stage: None,
            fields: serde_json::json!({}),
            fingerprint: String::new(),
            resolved_from: None,
            source_created_at: None,
            source_updated_at: None,
            synced_at: None,
        };
        assert!(matches!(
            row.into_record(),
            Err(StoreError::Serialization(_))
        ));
    }
}
