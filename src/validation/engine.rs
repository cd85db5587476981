//! Validate-and-retry loop around the model provider.
//!
//! Each attempt calls the model, validates the whole response and, on failure, grows
//! the conversation by the invalid output plus a corrective instruction. After
//! `max_retries` corrective re-issues the loop gives up and falls back to salvage.
//! Every suspension point re-checks the attempt guard, so a cancelled or superseded
//! attempt stops without producing a result.

use super::retry_prompt::build_retry_prompt;
use super::{extract, fallback, DiagramSet, ResponseValidator, SchemaId, ValidatedData};
use crate::error::ProviderError;
use crate::provider::{ChatMessage, CompletionOptions, ModelProviderClient};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lets the loop ask whether its attempt still owns the document.
pub trait AttemptGuard: Send + Sync {
    /// False once a newer attempt has replaced this one or it settled elsewhere.
    fn is_current(&self) -> bool;

    fn cancel_token(&self) -> &CancellationToken;
}

/// Guard for calls that belong to no orchestrated task; current until cancelled.
#[derive(Debug, Clone, Default)]
pub struct DetachedGuard {
    cancel: CancellationToken,
}

impl DetachedGuard {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

impl AttemptGuard for DetachedGuard {
    fn is_current(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Bookkeeping for one validation loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryState {
    /// Corrective re-issues performed so far
    pub attempt: u32,
    pub last_errors: Vec<String>,
    pub last_raw_content: String,
}

/// Outbound result handed to the caller once validation is finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedFrame {
    pub validated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ValidatedData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<String>>,
    pub retry_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutcome {
    Finished(ValidatedFrame),
    /// The cancel token fired; nothing was produced.
    Cancelled,
    /// A newer attempt took over; nothing was produced.
    Superseded,
}

enum CallResult {
    Content(String),
    Stopped(EngineOutcome),
}

pub struct ValidationEngine {
    client: Arc<dyn ModelProviderClient>,
    options: CompletionOptions,
    max_retries: u32,
    streaming: bool,
}

impl ValidationEngine {
    pub fn new(
        client: Arc<dyn ModelProviderClient>,
        options: CompletionOptions,
        max_retries: u32,
    ) -> Self {
        Self {
            client,
            options,
            max_retries,
            streaming: true,
        }
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run the loop: at most `max_retries + 1` model calls, then fallback.
    ///
    /// Transport failures end the loop immediately with the provider error; they are
    /// not retried here.
    pub async fn generate(
        &self,
        validator: &dyn ResponseValidator,
        messages: Vec<ChatMessage>,
        guard: &dyn AttemptGuard,
    ) -> Result<EngineOutcome, ProviderError> {
        let schema = validator.schema();
        let mut conversation = messages;
        let mut state = RetryState::default();

        loop {
            debug!(schema = %schema, attempt = state.attempt, "Calling model");
            let raw = match self.call_model(&conversation, guard).await? {
                CallResult::Content(raw) => raw,
                CallResult::Stopped(outcome) => return Ok(outcome),
            };

            let outcome = validator.validate(&raw);
            if outcome.is_valid() {
                info!(
                    schema = %schema,
                    attempt = state.attempt,
                    "Response validated"
                );
                let text = extract::extract_json(&raw, &[schema.marker_key()]).remainder;
                return Ok(EngineOutcome::Finished(ValidatedFrame {
                    validated: true,
                    data: outcome.into_data(),
                    text_content: Some(text).filter(|t| !t.trim().is_empty()),
                    raw_content: None,
                    validation_errors: None,
                    retry_count: state.attempt,
                }));
            }

            warn!(
                schema = %schema,
                attempt = state.attempt,
                error_count = outcome.errors().len(),
                first_error = outcome.errors().first().map(String::as_str).unwrap_or_default(),
                "Response failed validation"
            );
            state.last_errors = outcome.errors().to_vec();
            state.last_raw_content = raw;

            if state.attempt >= self.max_retries {
                break;
            }
            conversation.push(ChatMessage::assistant(state.last_raw_content.clone()));
            conversation.push(ChatMessage::user(build_retry_prompt(
                schema,
                &state.last_errors,
            )));
            state.attempt += 1;
        }

        warn!(
            schema = %schema,
            retries = state.attempt,
            "Retry budget exhausted, using fallback extraction"
        );
        Ok(EngineOutcome::Finished(fallback_frame(schema, state)))
    }

    async fn call_model(
        &self,
        conversation: &[ChatMessage],
        guard: &dyn AttemptGuard,
    ) -> Result<CallResult, ProviderError> {
        if let Some(stopped) = interrupted(guard) {
            return Ok(CallResult::Stopped(stopped));
        }
        let cancel = guard.cancel_token().clone();

        if !self.streaming {
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(CallResult::Stopped(EngineOutcome::Cancelled)),
                response = self.client.complete(conversation.to_vec(), self.options.clone()) => response?,
            };
            if let Some(stopped) = interrupted(guard) {
                return Ok(CallResult::Stopped(stopped));
            }
            return Ok(CallResult::Content(response.content));
        }

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(CallResult::Stopped(EngineOutcome::Cancelled)),
            stream = self.client.stream(conversation.to_vec(), self.options.clone()) => stream?,
        };
        let mut content = String::new();
        loop {
            if let Some(stopped) = interrupted(guard) {
                return Ok(CallResult::Stopped(stopped));
            }
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(CallResult::Stopped(EngineOutcome::Cancelled)),
                next = stream.next() => next,
            };
            match next {
                Some(fragment) => content.push_str(&fragment?),
                None => break,
            }
        }
        if let Some(stopped) = interrupted(guard) {
            return Ok(CallResult::Stopped(stopped));
        }
        Ok(CallResult::Content(content))
    }
}

fn interrupted(guard: &dyn AttemptGuard) -> Option<EngineOutcome> {
    if guard.cancel_token().is_cancelled() {
        Some(EngineOutcome::Cancelled)
    } else if !guard.is_current() {
        Some(EngineOutcome::Superseded)
    } else {
        None
    }
}

fn fallback_frame(schema: SchemaId, state: RetryState) -> ValidatedFrame {
    let data = match schema {
        SchemaId::Diagram => {
            let diagrams = fallback::salvage_diagrams(&state.last_raw_content);
            (!diagrams.is_empty()).then(|| ValidatedData::Diagrams(DiagramSet { diagrams }))
        }
        SchemaId::Conversation => None,
    };

    ValidatedFrame {
        validated: false,
        data,
        text_content: Some(state.last_raw_content.clone()),
        raw_content: Some(state.last_raw_content),
        validation_errors: Some(state.last_errors),
        retry_count: state.attempt,
    }
}
