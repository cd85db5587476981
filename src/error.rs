//! Error types for the generation workflow.

use std::fmt;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Category of an upstream transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Auth,
    RateLimit,
    ModelUnavailable,
    ServerError,
    Unknown,
}

impl ProviderErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderErrorKind::Auth => "auth",
            ProviderErrorKind::RateLimit => "rate_limit",
            ProviderErrorKind::ModelUnavailable => "model_unavailable",
            ProviderErrorKind::ServerError => "server_error",
            ProviderErrorKind::Unknown => "unknown",
        }
    }

    /// Human-facing hint shown next to the raw provider message.
    pub fn suggestion(self) -> &'static str {
        match self {
            ProviderErrorKind::Auth => "Check the provider API key and its permissions.",
            ProviderErrorKind::RateLimit => "Wait a moment before retrying, or lower request volume.",
            ProviderErrorKind::ModelUnavailable => {
                "Verify the configured model name is available for this provider."
            }
            ProviderErrorKind::ServerError => {
                "The provider is having trouble; retry shortly."
            }
            ProviderErrorKind::Unknown => "Retry the request; if it keeps failing, check the logs.",
        }
    }

    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ProviderErrorKind::Auth,
            429 => ProviderErrorKind::RateLimit,
            404 => ProviderErrorKind::ModelUnavailable,
            500..=599 => ProviderErrorKind::ServerError,
            _ => ProviderErrorKind::Unknown,
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream model call failure.
#[derive(Debug, Clone, Error)]
#[error("Provider error ({kind}): {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        Self::new(
            ProviderErrorKind::from_status(status),
            format!("Request failed with status {}: {}", status, body),
        )
    }

    pub fn suggestion(&self) -> &'static str {
        self.kind.suggestion()
    }
}

/// Crate-level error
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
