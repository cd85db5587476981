//! Configuration System
//!
//! Layered configuration for the provider connection, the generation policy, task
//! storage and logging. Files are merged by [`ConfigLoader`] and the result is
//! validated as a whole so every problem is reported at once.

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;
pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenflowConfig {
    /// Upstream model connection
    #[serde(default)]
    pub provider: ProviderSettings,

    /// Retry and recovery policy
    #[serde(default)]
    pub generation: GenerationSettings,

    /// Persisted task records
    #[serde(default)]
    pub storage: StorageSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream model connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Inline API key. Prefer `api_key_env` outside of local testing.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Use the streaming wire protocol for model calls
    #[serde(default = "default_true")]
    pub streaming: bool,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            streaming: default_true(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ProviderSettings {
    /// Inline key first, then the configured environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                std::env::var(&self.api_key_env)
                    .ok()
                    .filter(|k| !k.trim().is_empty())
            })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("Model name cannot be empty".to_string());
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(format!(
                "Base URL must start with http:// or https://, got '{}'",
                self.base_url
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!(
                "Temperature must be between 0.0 and 2.0, got {}",
                self.temperature
            ));
        }
        if self.max_tokens == 0 {
            return Err("max_tokens must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Retry and recovery policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    /// Corrective re-issues after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Content length that counts as evidence an interrupted attempt had finished.
    /// A heuristic; tune per deployment.
    #[serde(default = "default_recovery_min_content_len")]
    pub recovery_min_content_len: usize,

    /// How long settled task records are kept before the sweep deletes them
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

/// Ten years
const MAX_RETENTION_HOURS: u64 = 24 * 365 * 10;

fn default_max_retries() -> u32 {
    2
}

fn default_recovery_min_content_len() -> usize {
    100
}

fn default_retention_hours() -> u64 {
    24 * 7
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            recovery_min_content_len: default_recovery_min_content_len(),
            retention_hours: default_retention_hours(),
        }
    }
}

impl GenerationSettings {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(60 * 60))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries > 10 {
            return Err(format!(
                "max_retries must be at most 10, got {}",
                self.max_retries
            ));
        }
        if self.retention_hours == 0 {
            return Err("retention_hours must be greater than zero".to_string());
        }
        if self.retention_hours > MAX_RETENTION_HOURS {
            return Err(format!(
                "retention_hours must be at most {}, got {}",
                MAX_RETENTION_HOURS, self.retention_hours
            ));
        }
        Ok(())
    }
}

/// Task record storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "genflow")
        .map(|dirs| dirs.data_dir().join("tasks"))
        .unwrap_or_else(|| PathBuf::from(".genflow/tasks"))
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Provider(String),
    Generation(String),
    Storage(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Provider(msg) => write!(f, "Provider: {}", msg),
            ValidationError::Generation(msg) => write!(f, "Generation: {}", msg),
            ValidationError::Storage(msg) => write!(f, "Storage: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl GenflowConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.provider.validate() {
            errors.push(ValidationError::Provider(e));
        }
        if let Err(e) = self.generation.validate() {
            errors.push(ValidationError::Generation(e));
        }
        if self.storage.path.as_os_str().is_empty() {
            errors.push(ValidationError::Storage(
                "Store path cannot be empty".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
