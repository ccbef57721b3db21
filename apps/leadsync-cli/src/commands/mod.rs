//! CLI command implementations

pub mod checkpoint;
pub mod run;
pub mod validate;

use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use leadsync_sync::checkpoint::CheckpointConfig;
use leadsync_sync::store::{connect_pool, StoreKind};
use leadsync_sync::{
    CanonicalStore, CheckpointStore, FileCheckpointStore, InMemoryStore, MemoryCheckpointStore,
    PgCanonicalStore, PgCheckpointStore,
};

use crate::config::AppConfig;
use crate::error::{CliError, CliResult};

/// Store backends of one invocation.
pub struct Backends {
    pub store: Arc<dyn CanonicalStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
}

impl Backends {
    /// Open the canonical store and checkpoint store.
    pub async fn connect(config: &AppConfig) -> CliResult<Self> {
        let pool = open_pool(config).await?;

        let store: Arc<dyn CanonicalStore> = match &pool {
            Some(pool) => {
                let store = PgCanonicalStore::new(pool.clone(), &config.store);
                store.ensure_schema().await?;
                Arc::new(store)
            }
            None => Arc::new(InMemoryStore::new()),
        };
        let checkpoints = open_checkpoints(config, pool.as_ref()).await?;

        Ok(Self { store, checkpoints })
    }
}

async fn open_pool(config: &AppConfig) -> CliResult<Option<PgPool>> {
    if config.store.kind != StoreKind::Postgres {
        return Ok(None);
    }
    info!(url = %config.store.redacted_url(), "Connecting to canonical store");
    Ok(Some(connect_pool(&config.store).await?))
}

/// Open only the checkpoint store.
pub async fn open_checkpoint_store(config: &AppConfig) -> CliResult<Arc<dyn CheckpointStore>> {
    let pool = match config.checkpoint {
        CheckpointConfig::Postgres { .. } => open_pool(config).await?,
        _ => None,
    };
    open_checkpoints(config, pool.as_ref()).await
}

async fn open_checkpoints(
    config: &AppConfig,
    pool: Option<&PgPool>,
) -> CliResult<Arc<dyn CheckpointStore>> {
    Ok(match &config.checkpoint {
        CheckpointConfig::File { dir } => Arc::new(FileCheckpointStore::new(dir.clone())),
        CheckpointConfig::Postgres { table } => {
            let pool = pool.ok_or_else(|| {
                CliError::Config("postgres checkpoints need the postgres store".to_string())
            })?;
            let store = PgCheckpointStore::new(pool.clone(), &config.store.schema, table);
            store.ensure_schema().await?;
            Arc::new(store)
        }
        CheckpointConfig::Memory => Arc::new(MemoryCheckpointStore::new()),
    })
}
