//! Error types for the entire engine.
//!
//! We use `thiserror` for library-style errors with custom types,
//! and `anyhow` for application-level error propagation in main.rs.

use thiserror::Error;

/// Errors that can occur while detecting or upgrading a versioned document
///
/// These are fatal for the whole capture: an unrecognized or partially
/// upgraded document never produces partial output.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("document matches neither the raw-capture nor the analysis format")]
    UnrecognizedFormat,

    #[error("document version {found} is newer than supported version {supported}; upgrade this tool")]
    FutureVersion { found: u32, supported: u32 },

    #[error("upgrade step for version {version} failed: {reason}")]
    UpgradeFailed { version: u32, reason: String },

    #[error("JSON deserialization failed: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Errors that can occur while building or deriving per-thread tables
///
/// These are scoped to a single thread: a corrupt thread does not prevent
/// the rest of the capture from being usable.
#[derive(Error, Debug)]
pub enum TableError {
    #[error("stack table of thread {thread} has a cyclic prefix chain at stack {stack}")]
    CorruptStackTable { thread: usize, stack: usize },

    #[error("thread {thread}: {table} row {row} references {column} {value} which is out of range")]
    DanglingReference {
        thread: usize,
        table: &'static str,
        row: usize,
        column: &'static str,
        value: usize,
    },
}

/// Errors reported by a symbol-information provider
///
/// Per-library and non-fatal: the affected functions stay unresolved and
/// processing continues with the next library.
#[derive(Error, Debug)]
pub enum SymbolError {
    #[error("no symbol information available for library {debug_name}")]
    LibraryNotFound { debug_name: String },

    #[error("symbol provider failed for library {debug_name}: {reason}")]
    ProviderFailed { debug_name: String, reason: String },
}

/// Errors that can occur during file output
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write file: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error("Failed to read file: {0}")]
    ReadFailed(std::io::Error),

    #[error("Failed to serialize JSON: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Invalid output path: {0}")]
    InvalidPath(String),
}

/// Umbrella error for the end-to-end pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
