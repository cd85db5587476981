//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
///
/// Only keys whose defaults must exist before any file is layered are seeded here;
/// everything else falls back to the serde defaults on the typed config.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("generation.max_retries", 2)?
        .set_default("provider.streaming", true)
}
