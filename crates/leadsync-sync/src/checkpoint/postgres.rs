//! PostgreSQL checkpoint store.

use async_trait::async_trait;
use sqlx::PgPool;

use super::{Checkpoint, CheckpointError, CheckpointResult, CheckpointStore};

/// One row per job: `(job_name, state JSONB, updated_at)`.
#[derive(Debug, Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
    schema: String,
    qualified_table: String,
}

impl PgCheckpointStore {
    /// Create a store over an existing pool.
    pub fn new(pool: PgPool, schema: &str, table: &str) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
            qualified_table: format!(
                "\"{}\".\"{}\"",
                schema.replace('"', "\"\""),
                table.replace('"', "\"\"")
            ),
        }
    }

    /// Create the checkpoint table if missing.
    pub async fn ensure_schema(&self) -> CheckpointResult<()> {
        let create_schema = format!(
            "CREATE SCHEMA IF NOT EXISTS \"{}\"",
            self.schema.replace('"', "\"\"")
        );
        let create_table = format!(
            r"
            CREATE TABLE IF NOT EXISTS {} (
                job_name TEXT PRIMARY KEY,
                state JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            ",
            self.qualified_table
        );

        for statement in [create_schema, create_table] {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| CheckpointError::Database(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn load(&self, job_name: &str) -> CheckpointResult<Checkpoint> {
        let query = format!(
            "SELECT state FROM {} WHERE job_name = $1",
            self.qualified_table
        );
        let row: Option<(serde_json::Value,)> = sqlx::query_as(&query)
            .bind(job_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CheckpointError::Database(e.to_string()))?;

        match row {
            Some((json,)) => serde_json::from_value(json)
                .map_err(|e| CheckpointError::Deserialization(e.to_string())),
            None => Ok(Checkpoint::fresh(job_name)),
        }
    }

    async fn save(&self, checkpoint: &Checkpoint) -> CheckpointResult<()> {
        let state = serde_json::to_value(checkpoint)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        let query = format!(
            r"
            INSERT INTO {} (job_name, state, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (job_name) DO UPDATE SET state = $2, updated_at = NOW()
            ",
            self.qualified_table
        );
        sqlx::query(&query)
            .bind(&checkpoint.job_name)
            .bind(&state)
            .execute(&self.pool)
            .await
            .map_err(|e| CheckpointError::Database(e.to_string()))?;

        Ok(())
    }

    async fn clear(&self, job_name: &str) -> CheckpointResult<()> {
        let query = format!("DELETE FROM {} WHERE job_name = $1", self.qualified_table);
        sqlx::query(&query)
            .bind(job_name)
            .execute(&self.pool)
            .await
            .map_err(|e| CheckpointError::Database(e.to_string()))?;

        Ok(())
    }
}
