//! Configuration sources layered by the loader, lowest precedence first.

pub mod global_file;
pub mod workspace_file;
