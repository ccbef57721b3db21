//! In-memory checkpoint store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use super::{Checkpoint, CheckpointResult, CheckpointStore};

/// Process-local checkpoints.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
    saves: AtomicUsize,
}

impl MemoryCheckpointStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored checkpoint of a job, if any.
    pub async fn get(&self, job_name: &str) -> Option<Checkpoint> {
        self.checkpoints.lock().await.get(job_name).cloned()
    }

    /// Number of saves since creation.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, job_name: &str) -> CheckpointResult<Checkpoint> {
        Ok(self
            .get(job_name)
            .await
            .unwrap_or_else(|| Checkpoint::fresh(job_name)))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> CheckpointResult<()> {
        self.checkpoints
            .lock()
            .await
            .insert(checkpoint.job_name.clone(), checkpoint.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self, job_name: &str) -> CheckpointResult<()> {
        self.checkpoints.lock().await.remove(job_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_roundtrip() {
        let store = MemoryCheckpointStore::new();
        assert!(store.load("a").await.unwrap().is_fresh());

        let mut checkpoint = Checkpoint::fresh("a");
        checkpoint.complete_stage("lead");
        store.save(&checkpoint).await.unwrap();

        assert!(store.load("a").await.unwrap().is_stage_completed("lead"));
        assert_eq!(store.save_count(), 1);

        store.clear("a").await.unwrap();
        assert!(store.get("a").await.is_none());
    }
}
