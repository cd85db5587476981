//! Model Provider Abstraction
//!
//! One request per attempt against an OpenAI-compatible chat completions endpoint,
//! either buffered (content at `choices[0].message.content`) or streamed through the
//! frame decoder in [`frame`].

use crate::config::ProviderSettings;
use crate::error::{ApiError, ProviderError, ProviderErrorKind};
use async_trait::async_trait;
use futures::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tracing::debug;

pub mod frame;

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Completion options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            max_tokens: Some(4096),
        }
    }
}

impl From<&ProviderSettings> for CompletionOptions {
    fn from(settings: &ProviderSettings) -> Self {
        Self {
            temperature: Some(settings.temperature),
            max_tokens: Some(settings.max_tokens),
        }
    }
}

/// Completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Lazy sequence of content fragments from one streamed call
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Model provider client trait
#[async_trait]
pub trait ModelProviderClient: Send + Sync {
    /// Generate a buffered completion
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Generate a streaming completion
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<FragmentStream, ProviderError>;

    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn map_http_error(error: reqwest::Error) -> ProviderError {
    if let Some(status) = error.status() {
        ProviderError::new(
            ProviderErrorKind::from_status(status.as_u16()),
            format!("Request failed with status {}: {}", status, error),
        )
    } else if error.is_timeout() {
        ProviderError::new(
            ProviderErrorKind::ServerError,
            format!("Request timeout: {}", error),
        )
    } else if error.is_connect() {
        ProviderError::new(
            ProviderErrorKind::ServerError,
            format!("Connection error: {}", error),
        )
    } else {
        ProviderError::new(ProviderErrorKind::Unknown, format!("HTTP error: {}", error))
    }
}

/// Client for any OpenAI-compatible chat completions endpoint
pub struct OpenAICompatibleClient {
    client: Client,
    model: String,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAICompatibleClient {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| ApiError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            model: settings.model.clone(),
            api_key: settings.resolve_api_key(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            stream: stream.then_some(true),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        debug!(
            model = %self.model,
            message_count = messages.len(),
            stream,
            "Sending chat completion request"
        );
        let response = builder.send().await.map_err(map_http_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelProviderClient for OpenAICompatibleClient {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<CompletionResponse, ProviderError> {
        let response = self.send(&messages, &options, false).await?;
        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::Unknown,
                format!("Failed to parse response: {}", e),
            )
        })?;

        let choice = completion.choices.into_iter().next().ok_or_else(|| {
            ProviderError::new(ProviderErrorKind::Unknown, "No choices in response")
        })?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            model: completion.model,
            finish_reason: choice.finish_reason,
        })
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
    ) -> Result<FragmentStream, ProviderError> {
        let response = self.send(&messages, &options, true).await?;
        Ok(frame::decode_fragments(response.bytes_stream()))
    }

    fn provider_name(&self) -> &str {
        "openai-compatible"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
