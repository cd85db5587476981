//! Durable sled-backed task record store, one key per document.

use std::io;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::task::GenerationPhase;

const TREE_TASKS: &str = "generation_tasks";

/// Last persisted state of a document's task. Times are epoch milliseconds,
/// `elapsed_time` is whole seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub phase: GenerationPhase,
    pub start_time: i64,
    pub elapsed_time: u64,
    #[serde(default)]
    pub stream_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: i64,
}

#[derive(Clone)]
pub struct TaskStore {
    db: Db,
    tasks: Tree,
}

impl TaskStore {
    pub fn new(db: Db) -> Result<Self, StorageError> {
        let tasks = db.open_tree(TREE_TASKS).map_err(to_storage_io)?;
        Ok(Self { db, tasks })
    }

    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = sled::open(path).map_err(to_storage_io)?;
        Self::new(db)
    }

    pub fn shared(db: Db) -> Result<Arc<Self>, StorageError> {
        Ok(Arc::new(Self::new(db)?))
    }

    pub fn put(&self, document_id: &str, record: &TaskRecord) -> Result<(), StorageError> {
        let value = serde_json::to_vec(record).map_err(to_storage_data)?;
        self.tasks
            .insert(document_id.as_bytes(), value)
            .map_err(to_storage_io)?;
        Ok(())
    }

    pub fn get(&self, document_id: &str) -> Result<Option<TaskRecord>, StorageError> {
        let Some(raw) = self
            .tasks
            .get(document_id.as_bytes())
            .map_err(to_storage_io)?
        else {
            return Ok(None);
        };
        let parsed = serde_json::from_slice(&raw).map_err(to_storage_data)?;
        Ok(Some(parsed))
    }

    pub fn delete(&self, document_id: &str) -> Result<bool, StorageError> {
        let removed = self
            .tasks
            .remove(document_id.as_bytes())
            .map_err(to_storage_io)?;
        Ok(removed.is_some())
    }

    /// Every decodable record, ordered by document id. Undecodable values are
    /// skipped so one bad entry cannot block recovery or the sweep for the rest.
    pub fn list(&self) -> Result<Vec<(String, TaskRecord)>, StorageError> {
        let mut out = Vec::new();
        for result in self.tasks.iter() {
            let (key, value) = result.map_err(to_storage_io)?;
            let document_id = String::from_utf8_lossy(&key).into_owned();
            match serde_json::from_slice::<TaskRecord>(&value) {
                Ok(record) => out.push((document_id, record)),
                Err(err) => warn!(
                    document_id = %document_id,
                    error = %err,
                    "Skipping undecodable task record"
                ),
            }
        }
        Ok(out)
    }

    /// Delete settled records last updated more than `retention_ms` before `now_ms`.
    /// Generating and idle records are never touched.
    pub fn sweep_terminal(&self, retention_ms: u64, now_ms: i64) -> Result<usize, StorageError> {
        let mut removed = 0usize;
        for (document_id, record) in self.list()? {
            if !record.phase.is_settled() {
                continue;
            }
            let age = now_ms.saturating_sub(record.updated_at).max(0) as u64;
            if age > retention_ms {
                self.delete(&document_id)?;
                debug!(document_id = %document_id, phase = %record.phase, "Swept expired task record");
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(to_storage_io)?;
        Ok(())
    }
}

fn to_storage_io(err: sled::Error) -> StorageError {
    StorageError::IoError(io::Error::new(io::ErrorKind::Other, err.to_string()))
}

fn to_storage_data(err: serde_json::Error) -> StorageError {
    StorageError::IoError(io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
}
