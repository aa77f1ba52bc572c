//! Durable progress for resumable runs.
//!
//! A checkpoint is keyed by the run's task queue and workflow id. It holds
//! the identifiers from the listing stage and every row and failure produced
//! so far, so a restarted run skips the listing call and continues at the
//! first identifier that was not finished.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::failure_tolerance::FailureRecord;
use crate::core::{Identifier, ProjectedRow};
use crate::errors::CheckpointError;

/// Derives the store key for a run.
#[must_use]
pub fn checkpoint_key(task_queue: &str, workflow_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(task_queue.as_bytes());
    hasher.update([0u8]);
    hasher.update(workflow_id.as_bytes());
    format!("ckpt:{}", hex::encode(hasher.finalize()))
}

/// Saved progress of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// `task_queue/workflow_id` of the run that wrote it.
    pub run_key: String,
    /// Projection columns in force when the rows were produced.
    pub columns: Vec<String>,
    /// Output of the listing stage, once it has succeeded.
    pub identifiers: Option<Vec<Identifier>>,
    /// Index of the first identifier not yet processed.
    pub next_index: usize,
    /// Rows produced so far.
    pub rows: Vec<ProjectedRow>,
    /// Identifiers dropped so far.
    pub failures: Vec<FailureRecord>,
    /// Last write.
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Creates an empty checkpoint.
    #[must_use]
    pub fn new(run_key: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            run_key: run_key.into(),
            columns,
            identifiers: None,
            next_index: 0,
            rows: Vec::new(),
            failures: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Records the listing stage output.
    #[must_use]
    pub fn with_identifiers(mut self, identifiers: Vec<Identifier>) -> Self {
        self.identifiers = Some(identifiers);
        self.updated_at = Utc::now();
        self
    }

    /// Records batch progress.
    pub fn record_progress(
        &mut self,
        next_index: usize,
        rows: &[ProjectedRow],
        failures: &[FailureRecord],
    ) {
        self.next_index = next_index;
        self.rows = rows.to_vec();
        self.failures = failures.to_vec();
        self.updated_at = Utc::now();
    }

    /// Identifiers not yet processed.
    #[must_use]
    pub fn remaining(&self) -> &[Identifier] {
        self.identifiers
            .as_deref()
            .and_then(|ids| ids.get(self.next_index..))
            .unwrap_or_default()
    }

    /// Rejects a checkpoint written under a different projection.
    pub fn ensure_columns(&self, key: &str, expected: &[String]) -> Result<(), CheckpointError> {
        if self.columns == expected {
            Ok(())
        } else {
            Err(CheckpointError::Incompatible {
                key: key.to_string(),
                expected: expected.to_vec(),
                found: self.columns.clone(),
            })
        }
    }
}

/// Storage backend for checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Loads a checkpoint, or `None` if none was saved.
    async fn load(&self, key: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Replaces the checkpoint under `key`.
    async fn save(&self, key: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Removes the checkpoint under `key`. Missing keys are not an error.
    async fn clear(&self, key: &str) -> Result<(), CheckpointError>;
}

/// In-memory checkpoint store.
///
/// Survives restarts of a pipeline inside one process only.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCheckpointStore {
    entries: Arc<Mutex<HashMap<String, Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    /// Creates a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, key: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn save(&self, key: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.entries.lock().insert(key.to_string(), checkpoint.clone());
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), CheckpointError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Checkpoint store writing one JSON file per key.
///
/// Writes go to a temporary file that is then renamed over the old one.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Creates a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the checkpoint files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key.replace(':', "_")))
    }
}

fn io_error(key: &str, source: std::io::Error) -> CheckpointError {
    CheckpointError::Io {
        key: key.to_string(),
        source,
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, key: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let bytes = match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(key, err)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CheckpointError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn save(&self, key: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let body = serde_json::to_vec_pretty(checkpoint).map_err(|e| CheckpointError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(key, e))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| io_error(key, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(key, e))
    }

    async fn clear(&self, key: &str) -> Result<(), CheckpointError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(key, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StageError;
    use pretty_assertions::assert_eq;

    fn sample() -> Checkpoint {
        let mut checkpoint = Checkpoint::new("q/w", vec!["title".into()])
            .with_identifiers(vec![Identifier::Int(1), Identifier::Int(2), Identifier::Int(3)]);
        checkpoint.record_progress(
            2,
            &[ProjectedRow::new(Identifier::Int(1), vec!["Hello".into()])],
            &[FailureRecord::new(Identifier::Int(2), &StageError::malformed("gone"), 1)],
        );
        checkpoint
    }

    #[test]
    fn test_checkpoint_key_is_stable_and_distinct() {
        let a = checkpoint_key("queue", "workflow");
        assert_eq!(a, checkpoint_key("queue", "workflow"));
        assert!(a.starts_with("ckpt:"));
        assert_eq!(a.len(), "ckpt:".len() + 64);
        assert_ne!(a, checkpoint_key("queuew", "orkflow"));
    }

    #[test]
    fn test_remaining_identifiers() {
        assert_eq!(sample().remaining(), &[Identifier::Int(3)]);
        assert!(Checkpoint::new("q/w", vec![]).remaining().is_empty());

        let mut past_end = sample();
        past_end.next_index = 10;
        assert!(past_end.remaining().is_empty());
    }

    #[test]
    fn test_ensure_columns() {
        let checkpoint = sample();
        assert!(checkpoint.ensure_columns("k", &["title".to_string()]).is_ok());

        let err = checkpoint
            .ensure_columns("k", &["title".to_string(), "link".to_string()])
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Incompatible { .. }));
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.load("k").await.unwrap().is_none());

        let checkpoint = sample();
        store.save("k", &checkpoint).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.load("k").await.unwrap(), Some(checkpoint));

        store.clear("k").await.unwrap();
        store.clear("k").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("nested"));
        let key = checkpoint_key("queue", "workflow");
        let checkpoint = sample();

        assert!(store.load(&key).await.unwrap().is_none());
        store.save(&key, &checkpoint).await.unwrap();
        assert_eq!(store.load(&key).await.unwrap(), Some(checkpoint));

        store.clear(&key).await.unwrap();
        assert!(store.load(&key).await.unwrap().is_none());
        store.clear(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let mut checkpoint = sample();
        store.save("k", &checkpoint).await.unwrap();
        checkpoint.next_index = 3;
        store.save("k", &checkpoint).await.unwrap();

        let loaded = store.load("k").await.unwrap().unwrap();
        assert_eq!(loaded.next_index, 3);
    }

    #[tokio::test]
    async fn test_file_store_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        tokio::fs::write(dir.path().join("ckpt_bad.json"), b"{not json")
            .await
            .unwrap();

        let err = store.load("ckpt:bad").await.unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
    }
}
