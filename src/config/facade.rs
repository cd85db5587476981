//! Config loader: merges every source into one validated [`GenflowConfig`].

use super::merge::merge_policy;
use super::sources::{global_file, workspace_file};
use super::GenflowConfig;
use config::{ConfigError, Environment, File};
use std::path::Path;

/// Loads configuration from files and the environment
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Precedence (lowest to highest): defaults, global file, workspace
    /// `config/config.toml`, workspace `config/{GENFLOW_ENV}.toml`, then
    /// `GENFLOW__SECTION__KEY` environment variables.
    pub fn load(workspace_root: &Path) -> Result<GenflowConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let config = builder.add_source(env_source()).build()?;
        config.try_deserialize()
    }

    /// Load configuration from one explicit file over the defaults.
    pub fn load_from_file(path: &Path) -> Result<GenflowConfig, ConfigError> {
        let config = merge_policy::builder_with_defaults()?
            .add_source(File::from(path).required(true))
            .add_source(env_source())
            .build()?;
        config.try_deserialize()
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("GENFLOW")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
