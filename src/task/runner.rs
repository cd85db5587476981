//! End-to-end generation flow for one document.
//!
//! The runner starts an attempt, drives the model (validated or plain streaming), and
//! settles the task through the orchestrator. Any result produced after the attempt
//! lost ownership is dropped.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error, info};

use crate::config::GenflowConfig;
use crate::error::{ApiError, ProviderError};
use crate::provider::{ChatMessage, CompletionOptions, ModelProviderClient};
use crate::task::orchestrator::{GenerationOrchestrator, SettledPhase};
use crate::task::{GenerationPhase, RequestId, StartOutcome, TaskHandle};
use crate::validation::engine::{AttemptGuard, EngineOutcome, ValidatedFrame, ValidationEngine};
use crate::validation::{SchemaId, SchemaResponseValidator, ValidatedData};
use tokio_util::sync::CancellationToken;

/// How a run ended. Cancellation and supersession are outcomes, not errors.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Settled {
        request_id: RequestId,
        phase: GenerationPhase,
        /// Present for validated runs
        frame: Option<ValidatedFrame>,
        content: String,
    },
    Cancelled,
    Superseded,
    /// Another attempt was generating; nothing was started
    AlreadyRunning(TaskHandle),
}

/// Ties one attempt's liveness to the orchestrator.
struct TaskGuard<'a> {
    orchestrator: &'a GenerationOrchestrator,
    handle: &'a TaskHandle,
}

impl AttemptGuard for TaskGuard<'_> {
    fn is_current(&self) -> bool {
        self.orchestrator
            .is_current(&self.handle.document_id, self.handle.request_id)
    }

    fn cancel_token(&self) -> &CancellationToken {
        &self.handle.cancel
    }
}

pub struct GenerationRunner {
    orchestrator: Arc<GenerationOrchestrator>,
    client: Arc<dyn ModelProviderClient>,
    engine: ValidationEngine,
    options: CompletionOptions,
}

impl GenerationRunner {
    pub fn new(
        orchestrator: Arc<GenerationOrchestrator>,
        client: Arc<dyn ModelProviderClient>,
        config: &GenflowConfig,
    ) -> Self {
        let options = CompletionOptions::from(&config.provider);
        let engine = ValidationEngine::new(
            client.clone(),
            options.clone(),
            config.generation.max_retries,
        )
        .with_streaming(config.provider.streaming);
        Self {
            orchestrator,
            client,
            engine,
            options,
        }
    }

    pub fn orchestrator(&self) -> &Arc<GenerationOrchestrator> {
        &self.orchestrator
    }

    /// Generate, validate with retries, and settle the task with one outbound frame.
    pub async fn run_validated(
        &self,
        document_id: &str,
        schema: SchemaId,
        messages: Vec<ChatMessage>,
    ) -> Result<RunOutcome, ApiError> {
        let handle = match self.begin(document_id)? {
            StartOutcome::Started(handle) => handle,
            StartOutcome::InProgress(handle) => return Ok(RunOutcome::AlreadyRunning(handle)),
        };
        let guard = TaskGuard {
            orchestrator: &self.orchestrator,
            handle: &handle,
        };
        let validator = SchemaResponseValidator::new(schema);

        let frame = match self.engine.generate(&validator, messages, &guard).await {
            Ok(EngineOutcome::Finished(frame)) => frame,
            Ok(EngineOutcome::Cancelled) => return Ok(self.cancelled(&handle)),
            Ok(EngineOutcome::Superseded) => return Ok(RunOutcome::Superseded),
            Err(err) => return self.fail(&handle, err),
        };

        let payload = serde_json::to_string(&frame)?;
        if !self
            .orchestrator
            .append(document_id, handle.request_id, &payload)
        {
            return Ok(interrupted(&handle));
        }

        let phase = settled_phase(&frame);
        if !self
            .orchestrator
            .complete(document_id, handle.request_id, phase)
        {
            return Ok(interrupted(&handle));
        }

        info!(
            document_id = %document_id,
            request_id = %handle.request_id,
            validated = frame.validated,
            retry_count = frame.retry_count,
            "Validated generation finished"
        );
        Ok(RunOutcome::Settled {
            request_id: handle.request_id,
            phase: phase.into(),
            frame: Some(frame),
            content: payload,
        })
    }

    /// Stream raw fragments into the task, calling `on_fragment` for each one applied.
    pub async fn run_streaming<F>(
        &self,
        document_id: &str,
        messages: Vec<ChatMessage>,
        mut on_fragment: F,
    ) -> Result<RunOutcome, ApiError>
    where
        F: FnMut(&str) + Send,
    {
        let handle = match self.begin(document_id)? {
            StartOutcome::Started(handle) => handle,
            StartOutcome::InProgress(handle) => return Ok(RunOutcome::AlreadyRunning(handle)),
        };
        let cancel = handle.cancel.clone();

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(self.cancelled(&handle)),
            opened = self.client.stream(messages, self.options.clone()) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => return self.fail(&handle, err),
        };

        let mut content = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.cancelled(&handle)),
                next = stream.next() => next,
            };
            let fragment = match next {
                None => break,
                Some(Ok(fragment)) => fragment,
                Some(Err(err)) => return self.fail(&handle, err),
            };
            if !self
                .orchestrator
                .append(document_id, handle.request_id, &fragment)
            {
                debug!(document_id = %document_id, "Stream abandoned by stale attempt");
                return Ok(interrupted(&handle));
            }
            on_fragment(&fragment);
            content.push_str(&fragment);
        }

        if !self
            .orchestrator
            .complete(document_id, handle.request_id, SettledPhase::Completed)
        {
            return Ok(interrupted(&handle));
        }
        Ok(RunOutcome::Settled {
            request_id: handle.request_id,
            phase: GenerationPhase::Completed,
            frame: None,
            content,
        })
    }

    fn begin(&self, document_id: &str) -> Result<StartOutcome, ApiError> {
        if document_id.trim().is_empty() {
            return Err(ApiError::InvalidRequest(
                "document id cannot be empty".to_string(),
            ));
        }
        Ok(self.orchestrator.start(document_id))
    }

    /// A token fired directly on the handle still has to release the task.
    fn cancelled(&self, handle: &TaskHandle) -> RunOutcome {
        self.orchestrator
            .cancel_attempt(&handle.document_id, handle.request_id);
        RunOutcome::Cancelled
    }

    /// Record a transport failure. Surfaced only if this attempt still owned the task.
    fn fail(&self, handle: &TaskHandle, err: ProviderError) -> Result<RunOutcome, ApiError> {
        error!(
            document_id = %handle.document_id,
            request_id = %handle.request_id,
            error = %err,
            "Generation failed"
        );
        if self
            .orchestrator
            .fail(&handle.document_id, handle.request_id, err.to_string())
        {
            Err(err.into())
        } else {
            Ok(interrupted(handle))
        }
    }
}

fn interrupted(handle: &TaskHandle) -> RunOutcome {
    if handle.cancel.is_cancelled() {
        RunOutcome::Cancelled
    } else {
        RunOutcome::Superseded
    }
}

/// Unfinished conversation turns wait for the user; everything else is done.
fn settled_phase(frame: &ValidatedFrame) -> SettledPhase {
    match &frame.data {
        Some(ValidatedData::Conversation(turn)) if !turn.meta.is_complete => {
            SettledPhase::Interactive
        }
        _ => SettledPhase::Completed,
    }
}
