//! Genflow: validated, race-free LLM generation
//!
//! Turns free-form model output into strictly typed data through a validate-and-retry
//! loop, and runs at most one generation per document with stale-result discarding,
//! persisted progress, restart recovery and cooperative cancellation.

pub mod config;
pub mod error;
pub mod logging;
pub mod provider;
pub mod task;
pub mod validation;
