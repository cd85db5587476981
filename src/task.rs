//! Generation tasks
//!
//! One task per document. The orchestrator owns every live task; callers only see
//! handles and snapshots. The persisted record is in [`store`].

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

pub mod orchestrator;
pub mod runner;
pub mod store;

pub use orchestrator::{
    DocumentProbe, GenerationOrchestrator, RecoveryAction, RecoveryNotice, RecoveryOutcome,
    SettledPhase,
};
pub use runner::{GenerationRunner, RunOutcome};
pub use store::{TaskRecord, TaskStore};

/// Lifecycle phase of a document's generation task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPhase {
    Idle,
    Generating,
    Interactive,
    Completed,
    Error,
}

impl GenerationPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationPhase::Idle => "idle",
            GenerationPhase::Generating => "generating",
            GenerationPhase::Interactive => "interactive",
            GenerationPhase::Completed => "completed",
            GenerationPhase::Error => "error",
        }
    }

    /// Terminal for one attempt: `interactive`, `completed` or `error`.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            GenerationPhase::Interactive | GenerationPhase::Completed | GenerationPhase::Error
        )
    }
}

impl fmt::Display for GenerationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one generation attempt. Unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        RequestId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Handle to a live attempt: who it is and how to stop it.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub document_id: String,
    pub request_id: RequestId,
    pub cancel: CancellationToken,
}

/// Result of asking to start generation for a document
#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// A new attempt with a fresh request id
    Started(TaskHandle),
    /// An attempt was already generating; its handle is returned unchanged
    InProgress(TaskHandle),
}

impl StartOutcome {
    pub fn handle(&self) -> &TaskHandle {
        match self {
            StartOutcome::Started(handle) | StartOutcome::InProgress(handle) => handle,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, StartOutcome::Started(_))
    }
}

/// Point-in-time view of a task. The cancel handle is never part of a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationTask {
    pub document_id: String,
    pub phase: GenerationPhase,
    pub request_id: Option<RequestId>,
    /// Epoch milliseconds
    pub started_at: Option<i64>,
    pub elapsed_seconds: u64,
    pub accumulated_content: Vec<String>,
    pub error: Option<String>,
}

impl GenerationTask {
    pub fn content(&self) -> String {
        self.accumulated_content.concat()
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
