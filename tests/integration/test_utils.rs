//! Shared test utilities for integration tests
//!
//! A scripted model client whose replies, failures and pauses are fixed up front, and
//! a store in a temporary directory.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use genflow::config::GenerationSettings;
use genflow::error::{ProviderError, ProviderErrorKind};
use genflow::provider::{
    ChatMessage, CompletionOptions, CompletionResponse, FragmentStream, ModelProviderClient,
};
use genflow::task::{GenerationOrchestrator, TaskStore};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Notify;

/// One scripted model call
pub enum Reply {
    Text(String),
    Fail(ProviderErrorKind, String),
    /// Signal `entered`, then wait for `release` before answering
    Held(String),
    /// Stream `first`, signal `entered`, wait for `release`, then stream `rest`
    HeldStream { first: String, rest: String },
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }
}

pub struct ScriptedClient {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
    chunk_size: usize,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl ScriptedClient {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Self::with_chunk_size(replies, 7)
    }

    /// Streamed replies are split into pieces of `chunk_size` bytes.
    pub fn with_chunk_size(replies: Vec<Reply>, chunk_size: usize) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
            chunk_size,
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Messages sent on each call, in order.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().clone()
    }

    async fn answer(&self, messages: Vec<ChatMessage>) -> Result<Answer, ProviderError> {
        self.calls.lock().push(messages);
        let reply = self.replies.lock().pop_front();
        match reply {
            None => Ok(Answer::Whole(String::new())),
            Some(Reply::Text(text)) => Ok(Answer::Whole(text)),
            Some(Reply::Fail(kind, message)) => Err(ProviderError::new(kind, message)),
            Some(Reply::Held(text)) => {
                self.entered.notify_one();
                self.release.notified().await;
                Ok(Answer::Whole(text))
            }
            Some(Reply::HeldStream { first, rest }) => Ok(Answer::Paused { first, rest }),
        }
    }

    fn chunks(&self, text: &str) -> Vec<String> {
        text.chars()
            .collect::<Vec<_>>()
            .chunks(self.chunk_size)
            .map(|chunk| chunk.iter().collect())
            .collect()
    }
}

enum Answer {
    Whole(String),
    Paused { first: String, rest: String },
}

#[async_trait]
impl ModelProviderClient for ScriptedClient {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        _options: CompletionOptions,
    ) -> Result<CompletionResponse, ProviderError> {
        let content = match self.answer(messages).await? {
            Answer::Whole(text) => text,
            Answer::Paused { first, rest } => {
                self.entered.notify_one();
                self.release.notified().await;
                format!("{}{}", first, rest)
            }
        };
        Ok(CompletionResponse {
            content,
            model: "scripted".to_string(),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        _options: CompletionOptions,
    ) -> Result<FragmentStream, ProviderError> {
        match self.answer(messages).await? {
            Answer::Whole(text) => {
                let pieces: Vec<Result<String, ProviderError>> =
                    self.chunks(&text).into_iter().map(Ok).collect();
                Ok(Box::pin(futures::stream::iter(pieces)))
            }
            Answer::Paused { first, rest } => {
                let entered = self.entered.clone();
                let release = self.release.clone();
                let first = self.chunks(&first);
                let rest = self.chunks(&rest);
                Ok(Box::pin(async_stream::stream! {
                    for piece in first {
                        yield Ok::<String, ProviderError>(piece);
                    }
                    entered.notify_one();
                    release.notified().await;
                    for piece in rest {
                        yield Ok::<String, ProviderError>(piece);
                    }
                }))
            }
        }
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }
}

/// Store backed by a temporary directory; keep the `TempDir` alive for the test.
pub fn temp_store() -> (TempDir, Arc<TaskStore>) {
    let dir = TempDir::new().unwrap();
    let store = TaskStore::open(&dir.path().join("tasks")).unwrap();
    (dir, Arc::new(store))
}

pub fn orchestrator_with(store: Arc<TaskStore>) -> Arc<GenerationOrchestrator> {
    Arc::new(GenerationOrchestrator::new(
        store,
        &GenerationSettings::default(),
    ))
}

pub const VALID_TURN: &str = r#"{"questions":[{"id":"q1","text":"Who are the primary users?","type":"single","options":[{"id":"a","label":"Staff"},{"id":"b","label":"Customers"}]}],"meta":{"phase":"discovery","progress":10,"isComplete":false}}"#;

pub const FINAL_TURN: &str = r#"{"questions":[{"id":"q9","text":"Anything else?","type":"multiple","options":[{"id":"a","label":"No"},{"id":"b","label":"Yes"}]}],"meta":{"phase":"review","progress":100,"isComplete":true}}"#;

pub const VALID_DIAGRAMS: &str = r#"{"diagrams":[{"title":"Checkout","type":"flowchart","code":"flowchart TD\n  A[Cart] --> B[Pay]"}]}"#;
