//! CLI command implementations.
//!
//! Each command is implemented in its own module.
//! Commands orchestrate the various library components to perform user tasks.

pub mod process;

// Re-export main command functions
pub use process::{execute_process, validate_args, ProcessArgs};
