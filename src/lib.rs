//! Trace Prep
//!
//! Processing engine for sampled performance-trace captures. Ingests
//! versioned capture documents (raw instrumented-runtime output, normalized
//! analysis documents, or the pre-versioning legacy format), upgrades them
//! to the current format, and normalizes them into deduplicated columnar
//! tables ready for call-tree analysis and symbolication.
//!
//! This crate provides the core implementation for the `trace-prep` CLI
//! tool; the pieces are also usable as a library:
//!
//! - [`pipeline`] - end-to-end document processing
//! - [`format`] - version detection and upgrade chains
//! - [`builder`] - raw capture to normalized tables
//! - [`call_tree`] - call-node reduction and inversion
//! - [`symbolicate`] - incremental symbol resolution and function merging
//! - [`output`] - JSON serialization with timestamp encodings

pub mod builder;
pub mod call_tree;
pub mod format;
pub mod output;
pub mod pipeline;
pub mod string_table;
pub mod symbolicate;
pub mod tables;
pub mod utils;
