//! The normalized, analysis-ready capture representation.
//!
//! A [`Capture`] is the typed form of an analysis document at the current
//! format version. It is what the table builder produces from raw captures
//! and what the JSON reader/writer round-trips.

pub mod counters;
pub mod thread;

pub use counters::{Counter, CounterSamplesTable};
pub use thread::Thread;

use serde::{Deserialize, Serialize};

use crate::string_table::StringTable;

/// One complete, normalized performance-trace capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capture {
    pub meta: CaptureMeta,
    /// Libraries are deduplicated and hoisted to capture scope; threads
    /// reference them by index through their resource tables.
    pub libs: Vec<Library>,
    pub shared: SharedData,
    pub threads: Vec<Thread>,
    #[serde(default)]
    pub counters: Vec<Counter>,
}

/// Capture-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMeta {
    /// Analysis format version; always the current version in memory.
    pub preprocessed_version: u32,
    /// Intended sampling interval in milliseconds.
    pub interval: f64,
    /// Capture start, in milliseconds since the epoch of the recorder.
    pub start_time: f64,
    #[serde(default)]
    pub product: String,
    /// When this capture was normalized (RFC 3339). Set once at build time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
}

/// Data shared by all threads of the capture.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedData {
    pub string_array: StringTable,
}

/// A loaded library observed in the capture.
///
/// `debug_name` plus `breakpad_id` identify the library for symbolication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Library {
    pub name: String,
    #[serde(default)]
    pub path: String,
    pub debug_name: String,
    #[serde(rename = "breakpadID")]
    pub breakpad_id: String,
}

impl Library {
    /// Identity key used for deduplication and symbolication requests.
    pub fn key(&self) -> (&str, &str) {
        (&self.debug_name, &self.breakpad_id)
    }
}
