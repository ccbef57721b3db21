//! JSON file checkpoint store.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{Checkpoint, CheckpointError, CheckpointResult, CheckpointStore};

/// Stores each job's checkpoint as `<dir>/<job>.json`.
///
/// Saves write a temporary file and rename it over the previous one, so a
/// crash mid-save leaves the last complete checkpoint in place.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the checkpoint files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a job's checkpoint file.
    #[must_use]
    pub fn path_for(&self, job_name: &str) -> PathBuf {
        let file_name: String = job_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, job_name: &str) -> CheckpointResult<Checkpoint> {
        let path = self.path_for(job_name);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| CheckpointError::Deserialization(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Checkpoint::fresh(job_name)),
            Err(e) => Err(CheckpointError::Io(format!("{}: {e}", path.display()))),
        }
    }

    async fn save(&self, checkpoint: &Checkpoint) -> CheckpointResult<()> {
        let contents = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CheckpointError::Io(format!("{}: {e}", self.dir.display())))?;

        let path = self.path_for(&checkpoint.job_name);
        let tmp = path.with_extension("json.tmp");

        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| CheckpointError::Io(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CheckpointError::Io(format!("{}: {e}", path.display())))?;

        debug!(job = %checkpoint.job_name, path = %path.display(), "Checkpoint saved");
        Ok(())
    }

    async fn clear(&self, job_name: &str) -> CheckpointResult<()> {
        let path = self.path_for(job_name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::Io(format!("{}: {e}", path.display()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::StageCounts;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_missing_is_fresh() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let checkpoint = store.load("nightly").await.unwrap();
        assert!(checkpoint.is_fresh());
        assert_eq!(checkpoint.job_name, "nightly");
    }

    #[tokio::test]
    async fn test_save_load_clear() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("nested"));

        let mut checkpoint = Checkpoint::fresh("nightly");
        checkpoint.advance("lead", 2, &StageCounts::default());
        store.save(&checkpoint).await.unwrap();

        let loaded = store.load("nightly").await.unwrap();
        assert_eq!(loaded, checkpoint);
        assert!(!store.path_for("nightly").with_extension("json.tmp").exists());

        store.clear("nightly").await.unwrap();
        assert!(store.load("nightly").await.unwrap().is_fresh());

        // Clearing twice is fine.
        store.clear("nightly").await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_file_is_deserialization_error() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        tokio::fs::write(store.path_for("nightly"), "{not json")
            .await
            .unwrap();

        let err = store.load("nightly").await.unwrap_err();
        assert!(matches!(err, CheckpointError::Deserialization(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_path_for_sanitizes() {
        let store = FileCheckpointStore::new("/tmp/cp");
        assert_eq!(
            store.path_for("../etc/passwd"),
            PathBuf::from("/tmp/cp/___etc_passwd.json")
        );
        assert_eq!(
            store.path_for("leads-nightly_2"),
            PathBuf::from("/tmp/cp/leads-nightly_2.json")
        );
    }
}
