//! Checkpoint persistence for resumable jobs.
//!
//! One checkpoint per job name, holding a cursor per stage. It is saved
//! only after a page's reconciliation has returned and cleared when the
//! whole job completes, so an interrupted run resumes from the last fully
//! committed page.

mod file;
mod memory;
mod postgres;
mod writer;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;
pub use postgres::PgCheckpointStore;
pub use writer::CheckpointWriter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::statistics::StageCounts;

/// Resumption state of one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCursor {
    /// Zero-based index of the next page to fetch.
    pub next_page: u32,
    /// End of data was reached.
    #[serde(default)]
    pub completed: bool,
    /// Work committed for this stage so far.
    #[serde(default)]
    pub counts: StageCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Checkpoint state of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job_name: String,
    /// Cursors keyed by `collection` or `collection/stage`.
    #[serde(default)]
    pub stages: BTreeMap<String, StageCursor>,
    /// Work committed across every stage.
    #[serde(default)]
    pub counts_so_far: StageCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Zero-cursor checkpoint.
    pub fn fresh(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            stages: BTreeMap::new(),
            counts_so_far: StageCounts::default(),
            started_at: None,
            updated_at: None,
        }
    }

    /// Whether no page has ever been committed.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.stages.is_empty()
    }

    /// Cursor of a stage.
    #[must_use]
    pub fn cursor(&self, stage_key: &str) -> Option<&StageCursor> {
        self.stages.get(stage_key)
    }

    /// Page a stage resumes at.
    #[must_use]
    pub fn next_page(&self, stage_key: &str) -> u32 {
        self.cursor(stage_key).map_or(0, |c| c.next_page)
    }

    /// Whether a stage already reached end of data.
    #[must_use]
    pub fn is_stage_completed(&self, stage_key: &str) -> bool {
        self.cursor(stage_key).is_some_and(|c| c.completed)
    }

    /// Record a committed page.
    pub fn advance(&mut self, stage_key: &str, next_page: u32, page_counts: &StageCounts) {
        let now = Utc::now();
        let cursor = self.stages.entry(stage_key.to_string()).or_default();
        cursor.next_page = next_page;
        cursor.counts.merge(page_counts);
        cursor.updated_at = Some(now);

        self.counts_so_far.merge(page_counts);
        self.started_at.get_or_insert(now);
        self.updated_at = Some(now);
    }

    /// Mark a stage as finished.
    pub fn complete_stage(&mut self, stage_key: &str) {
        let now = Utc::now();
        let cursor = self.stages.entry(stage_key.to_string()).or_default();
        cursor.completed = true;
        cursor.updated_at = Some(now);
        self.started_at.get_or_insert(now);
        self.updated_at = Some(now);
    }
}

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl CheckpointError {
    /// Check if a later attempt may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Io(_))
    }
}

/// Result type for checkpoint operations.
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Persistence seam for checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load a job's checkpoint, or a fresh one if none exists.
    async fn load(&self, job_name: &str) -> CheckpointResult<Checkpoint>;

    /// Persist a checkpoint, replacing the previous one.
    async fn save(&self, checkpoint: &Checkpoint) -> CheckpointResult<()>;

    /// Delete a job's checkpoint. Absent checkpoints are not an error.
    async fn clear(&self, job_name: &str) -> CheckpointResult<()>;
}

/// Checkpoint backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckpointConfig {
    /// One JSON file per job.
    File {
        #[serde(default = "default_checkpoint_dir")]
        dir: PathBuf,
    },
    /// A row per job in the canonical database.
    Postgres {
        #[serde(default = "default_checkpoint_table")]
        table: String,
    },
    /// Process-local; nothing survives a restart.
    Memory,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".leadsync/checkpoints")
}

fn default_checkpoint_table() -> String {
    "sync_checkpoints".to_string()
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self::File {
            dir: default_checkpoint_dir(),
        }
    }
}
