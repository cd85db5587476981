//! Generation task orchestrator
//!
//! Owns every document's task. Two separate guards keep results race-free: `start`
//! refuses a second attempt while one is generating, and every mutation compares the
//! caller's request id with the current one, so an attempt that lost its slot across
//! a suspension point can never touch the document again.
//!
//! Persistence on the live path is best-effort: the in-memory state is authoritative
//! and a failed write is logged, never surfaced. Recovery and sweep propagate storage
//! errors because they run against the store alone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GenerationSettings;
use crate::error::ApiError;
use crate::task::store::{TaskRecord, TaskStore};
use crate::task::{now_millis, GenerationPhase, GenerationTask, RequestId, StartOutcome, TaskHandle};

pub const INTERRUPTED_MESSAGE: &str = "Generation was interrupted before it finished";

/// Knows how much finished content a document already holds.
pub trait DocumentProbe: Send + Sync {
    /// `None` when the document is unknown to the probe.
    fn finished_content_len(&self, document_id: &str) -> Option<usize>;
}

/// Phases an attempt may settle into on success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettledPhase {
    Interactive,
    Completed,
}

impl From<SettledPhase> for GenerationPhase {
    fn from(phase: SettledPhase) -> Self {
        match phase {
            SettledPhase::Interactive => GenerationPhase::Interactive,
            SettledPhase::Completed => GenerationPhase::Completed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Retry,
}

/// Surfaced to the caller when a document needs a decision after restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryNotice {
    pub document_id: String,
    pub message: String,
    pub action: RecoveryAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// No persisted record for the document
    NotFound,
    /// An attempt is already running in this process; the record was left alone
    InFlight,
    /// A settled or idle record restored unchanged
    Restored(GenerationPhase),
    /// An interrupted attempt whose document already held enough content
    RecoveredAsCompleted,
    /// An interrupted attempt reclassified as an error
    Interrupted(RecoveryNotice),
    /// A record that was already in error before the restart
    PreviouslyFailed(RecoveryNotice),
}

impl RecoveryOutcome {
    pub fn notice(&self) -> Option<&RecoveryNotice> {
        match self {
            RecoveryOutcome::Interrupted(notice) | RecoveryOutcome::PreviouslyFailed(notice) => {
                Some(notice)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct TaskSlot {
    phase: GenerationPhase,
    request_id: Option<RequestId>,
    cancel: Option<CancellationToken>,
    started_at: Option<i64>,
    elapsed_seconds: u64,
    fragments: Vec<String>,
    error: Option<String>,
}

impl TaskSlot {
    fn generating(request_id: RequestId, cancel: CancellationToken, now: i64) -> Self {
        Self {
            phase: GenerationPhase::Generating,
            request_id: Some(request_id),
            cancel: Some(cancel),
            started_at: Some(now),
            elapsed_seconds: 0,
            fragments: Vec::new(),
            error: None,
        }
    }

    fn idle() -> Self {
        Self {
            phase: GenerationPhase::Idle,
            request_id: None,
            cancel: None,
            started_at: None,
            elapsed_seconds: 0,
            fragments: Vec::new(),
            error: None,
        }
    }

    fn from_record(record: &TaskRecord) -> Self {
        Self {
            phase: record.phase,
            request_id: None,
            cancel: None,
            started_at: Some(record.start_time),
            elapsed_seconds: record.elapsed_time,
            fragments: if record.stream_content.is_empty() {
                Vec::new()
            } else {
                vec![record.stream_content.clone()]
            },
            error: record.error.clone(),
        }
    }

    fn owned_by(&self, request_id: RequestId) -> bool {
        self.phase == GenerationPhase::Generating && self.request_id == Some(request_id)
    }

    fn handle(&self, document_id: &str) -> Option<TaskHandle> {
        Some(TaskHandle {
            document_id: document_id.to_string(),
            request_id: self.request_id?,
            cancel: self.cancel.clone()?,
        })
    }

    /// Live while generating, frozen otherwise.
    fn elapsed_at(&self, now: i64) -> u64 {
        match (self.phase, self.started_at) {
            (GenerationPhase::Generating, Some(started)) => {
                (now.saturating_sub(started).max(0) / 1000) as u64
            }
            _ => self.elapsed_seconds,
        }
    }

    fn settle(&mut self, phase: GenerationPhase, error: Option<String>, now: i64) {
        self.elapsed_seconds = self.elapsed_at(now);
        self.phase = phase;
        self.error = error;
        self.cancel = None;
    }

    fn to_record(&self, now: i64) -> TaskRecord {
        TaskRecord {
            phase: self.phase,
            start_time: self.started_at.unwrap_or(now),
            elapsed_time: self.elapsed_at(now),
            stream_content: self.fragments.concat(),
            error: self.error.clone(),
            updated_at: now,
        }
    }

    fn snapshot(&self, document_id: &str, now: i64) -> GenerationTask {
        GenerationTask {
            document_id: document_id.to_string(),
            phase: self.phase,
            request_id: self.request_id,
            started_at: self.started_at,
            elapsed_seconds: self.elapsed_at(now),
            accumulated_content: self.fragments.clone(),
            error: self.error.clone(),
        }
    }
}

/// Per-document exclusivity, supersession checks, persistence and recovery
pub struct GenerationOrchestrator {
    tasks: Mutex<HashMap<String, TaskSlot>>,
    store: Arc<TaskStore>,
    probe: Option<Arc<dyn DocumentProbe>>,
    recovery_min_content_len: usize,
    retention: Duration,
}

impl GenerationOrchestrator {
    pub fn new(store: Arc<TaskStore>, settings: &GenerationSettings) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            store,
            probe: None,
            recovery_min_content_len: settings.recovery_min_content_len,
            retention: settings.retention(),
        }
    }

    pub fn with_document_probe(mut self, probe: Arc<dyn DocumentProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Begin an attempt, or hand back the running one.
    pub fn start(&self, document_id: &str) -> StartOutcome {
        let mut tasks = self.tasks.lock();
        if let Some(handle) = tasks
            .get(document_id)
            .filter(|slot| slot.phase == GenerationPhase::Generating)
            .and_then(|slot| slot.handle(document_id))
        {
            info!(
                document_id = %document_id,
                request_id = %handle.request_id,
                "Generation already in progress"
            );
            return StartOutcome::InProgress(handle);
        }

        let request_id = RequestId::next();
        let cancel = CancellationToken::new();
        let now = now_millis();
        let slot = TaskSlot::generating(request_id, cancel.clone(), now);
        self.persist(document_id, &slot.to_record(now));
        tasks.insert(document_id.to_string(), slot);

        info!(document_id = %document_id, request_id = %request_id, "Generation started");
        StartOutcome::Started(TaskHandle {
            document_id: document_id.to_string(),
            request_id,
            cancel,
        })
    }

    /// Append a fragment. Returns false (and changes nothing) for a stale attempt.
    pub fn append(&self, document_id: &str, request_id: RequestId, fragment: &str) -> bool {
        let mut tasks = self.tasks.lock();
        let Some(slot) = tasks
            .get_mut(document_id)
            .filter(|slot| slot.owned_by(request_id))
        else {
            debug!(
                document_id = %document_id,
                request_id = %request_id,
                "Dropping fragment from stale attempt"
            );
            return false;
        };

        slot.fragments.push(fragment.to_string());
        let record = slot.to_record(now_millis());
        self.persist(document_id, &record);
        true
    }

    pub fn complete(&self, document_id: &str, request_id: RequestId, phase: SettledPhase) -> bool {
        self.settle(document_id, request_id, phase.into(), None)
    }

    pub fn fail(&self, document_id: &str, request_id: RequestId, message: impl Into<String>) -> bool {
        self.settle(
            document_id,
            request_id,
            GenerationPhase::Error,
            Some(message.into()),
        )
    }

    fn settle(
        &self,
        document_id: &str,
        request_id: RequestId,
        phase: GenerationPhase,
        error: Option<String>,
    ) -> bool {
        let mut tasks = self.tasks.lock();
        let Some(slot) = tasks
            .get_mut(document_id)
            .filter(|slot| slot.owned_by(request_id))
        else {
            warn!(
                document_id = %document_id,
                request_id = %request_id,
                phase = %phase,
                "Discarding result from superseded attempt"
            );
            return false;
        };

        let now = now_millis();
        slot.settle(phase, error, now);
        let record = slot.to_record(now);
        self.persist(document_id, &record);
        info!(
            document_id = %document_id,
            request_id = %request_id,
            phase = %phase,
            elapsed_seconds = slot.elapsed_seconds,
            "Generation settled"
        );
        true
    }

    /// Signal the running attempt to stop and go back to idle at once.
    /// Returns false when nothing was generating.
    pub fn cancel(&self, document_id: &str) -> bool {
        self.cancel_where(document_id, |slot| slot.phase == GenerationPhase::Generating)
    }

    /// Cancel only if `request_id` still owns the task; a stale attempt can never
    /// reset a newer one.
    pub fn cancel_attempt(&self, document_id: &str, request_id: RequestId) -> bool {
        self.cancel_where(document_id, |slot| slot.owned_by(request_id))
    }

    fn cancel_where(&self, document_id: &str, applies: impl Fn(&TaskSlot) -> bool) -> bool {
        let mut tasks = self.tasks.lock();
        let Some(slot) = tasks.get_mut(document_id).filter(|slot| applies(slot)) else {
            return false;
        };

        if let Some(token) = slot.cancel.take() {
            token.cancel();
        }
        let request_id = slot.request_id;
        *slot = TaskSlot::idle();
        let record = slot.to_record(now_millis());
        self.persist(document_id, &record);
        info!(
            document_id = %document_id,
            request_id = ?request_id.map(|id| id.to_string()),
            "Generation cancelled"
        );
        true
    }

    pub fn is_current(&self, document_id: &str, request_id: RequestId) -> bool {
        self.tasks
            .lock()
            .get(document_id)
            .is_some_and(|slot| slot.owned_by(request_id))
    }

    pub fn phase(&self, document_id: &str) -> GenerationPhase {
        self.tasks
            .lock()
            .get(document_id)
            .map(|slot| slot.phase)
            .unwrap_or(GenerationPhase::Idle)
    }

    pub fn snapshot(&self, document_id: &str) -> Option<GenerationTask> {
        let now = now_millis();
        self.tasks
            .lock()
            .get(document_id)
            .map(|slot| slot.snapshot(document_id, now))
    }

    /// Reconcile one persisted record after a restart.
    pub fn recover(&self, document_id: &str) -> Result<RecoveryOutcome, ApiError> {
        let Some(mut record) = self.store.get(document_id)? else {
            return Ok(RecoveryOutcome::NotFound);
        };

        let mut tasks = self.tasks.lock();
        if tasks
            .get(document_id)
            .is_some_and(|slot| slot.phase == GenerationPhase::Generating)
        {
            return Ok(RecoveryOutcome::InFlight);
        }

        let outcome = match record.phase {
            GenerationPhase::Generating => {
                let evidence = self
                    .probe
                    .as_ref()
                    .and_then(|probe| probe.finished_content_len(document_id))
                    .unwrap_or_else(|| record.stream_content.chars().count());
                record.updated_at = now_millis();

                if evidence >= self.recovery_min_content_len {
                    record.phase = GenerationPhase::Completed;
                    record.error = None;
                    self.store.put(document_id, &record)?;
                    info!(
                        document_id = %document_id,
                        evidence,
                        "Interrupted generation had finished content, marked completed"
                    );
                    RecoveryOutcome::RecoveredAsCompleted
                } else {
                    record.phase = GenerationPhase::Error;
                    record.error = Some(INTERRUPTED_MESSAGE.to_string());
                    self.store.put(document_id, &record)?;
                    warn!(
                        document_id = %document_id,
                        evidence,
                        "Interrupted generation marked as error"
                    );
                    RecoveryOutcome::Interrupted(RecoveryNotice {
                        document_id: document_id.to_string(),
                        message: INTERRUPTED_MESSAGE.to_string(),
                        action: RecoveryAction::Retry,
                    })
                }
            }
            GenerationPhase::Error => RecoveryOutcome::PreviouslyFailed(RecoveryNotice {
                document_id: document_id.to_string(),
                message: record
                    .error
                    .clone()
                    .unwrap_or_else(|| INTERRUPTED_MESSAGE.to_string()),
                action: RecoveryAction::Retry,
            }),
            phase => RecoveryOutcome::Restored(phase),
        };

        tasks.insert(document_id.to_string(), TaskSlot::from_record(&record));
        Ok(outcome)
    }

    /// Recover every persisted record, in document id order.
    pub fn recover_all(&self) -> Result<Vec<(String, RecoveryOutcome)>, ApiError> {
        let records = self.store.list()?;
        let mut outcomes = Vec::with_capacity(records.len());
        for (document_id, _) in records {
            let outcome = self.recover(&document_id)?;
            outcomes.push((document_id, outcome));
        }
        Ok(outcomes)
    }

    /// Delete settled records older than the configured retention window.
    pub fn sweep(&self) -> Result<usize, ApiError> {
        let retention_ms = u64::try_from(self.retention.as_millis()).unwrap_or(u64::MAX);
        let removed = self.store.sweep_terminal(retention_ms, now_millis())?;
        if removed > 0 {
            info!(removed, "Swept expired task records");
        }
        Ok(removed)
    }

    fn persist(&self, document_id: &str, record: &TaskRecord) {
        if let Err(err) = self.store.put(document_id, record) {
            warn!(
                document_id = %document_id,
                phase = %record.phase,
                error = %err,
                "Failed to persist task record"
            );
        }
    }
}
