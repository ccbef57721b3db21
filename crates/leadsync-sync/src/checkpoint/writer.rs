//! Single writer per job.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Checkpoint, CheckpointResult, CheckpointStore};
use crate::statistics::StageCounts;

/// Owns a job's checkpoint for the duration of a run.
///
/// Concurrent stages commit through one writer; the lock is held across
/// the save, so saves for the job are serialized and none is lost.
pub struct CheckpointWriter {
    store: Arc<dyn CheckpointStore>,
    state: Mutex<Checkpoint>,
    persist: bool,
}

impl CheckpointWriter {
    /// Create a writer that persists every commit.
    pub fn new(store: Arc<dyn CheckpointStore>, checkpoint: Checkpoint) -> Self {
        Self {
            store,
            state: Mutex::new(checkpoint),
            persist: true,
        }
    }

    /// Track progress in memory only (dry run).
    #[must_use]
    pub fn without_persistence(mut self) -> Self {
        self.persist = false;
        self
    }

    /// Record a fully reconciled page and persist the checkpoint.
    ///
    /// `next_page` is the page the stage resumes at. The in-memory state is
    /// only updated once the save succeeded.
    pub async fn commit_page(
        &self,
        stage_key: &str,
        next_page: u32,
        counts: &StageCounts,
        completed: bool,
    ) -> CheckpointResult<()> {
        let mut state = self.state.lock().await;

        let mut next = state.clone();
        next.advance(stage_key, next_page, counts);
        if completed {
            next.complete_stage(stage_key);
        }

        if self.persist {
            self.store.save(&next).await?;
        }
        debug!(
            job = %next.job_name,
            stage = %stage_key,
            next_page,
            completed,
            "Checkpoint committed"
        );

        *state = next;
        Ok(())
    }

    /// Mark a stage finished without a new page (end of data on a fetch).
    pub async fn complete_stage(&self, stage_key: &str) -> CheckpointResult<()> {
        let mut state = self.state.lock().await;

        let mut next = state.clone();
        next.complete_stage(stage_key);
        if self.persist {
            self.store.save(&next).await?;
        }

        *state = next;
        Ok(())
    }

    /// Delete the persisted checkpoint after the whole job completed.
    pub async fn clear(&self) -> CheckpointResult<()> {
        let state = self.state.lock().await;
        if self.persist {
            self.store.clear(&state.job_name).await?;
        }
        Ok(())
    }

    /// Current state.
    pub async fn snapshot(&self) -> Checkpoint {
        self.state.lock().await.clone()
    }
}
