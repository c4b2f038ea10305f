//! End-to-end capture processing.
//!
//! Ties the stages together: detect which format a document is in, run the
//! matching upgrade chain (adapting legacy documents first), turn the result
//! into a normalized [`Capture`], and normalize counters. Every document
//! that comes out of here is at the current analysis version with absolute
//! counter values.

use std::path::Path;

use log::{debug, info};
use serde_json::Value;

use crate::builder::build_capture;
use crate::format::{analysis, detect_document_kind, legacy, raw, DocumentKind};
use crate::output::deserialize_capture;
use crate::tables::counters::normalize_counters;
use crate::tables::Capture;
use crate::utils::error::{OutputError, PipelineError};

/// Process one capture document of any supported format into a normalized
/// [`Capture`].
pub fn process_document(mut doc: Value) -> Result<Capture, PipelineError> {
    let kind = detect_document_kind(&doc)?;
    debug!("detected document kind: {kind:?}");

    let mut capture = match kind {
        DocumentKind::Legacy => {
            let mut adapted = legacy::adapt_legacy_document(&doc)?;
            analysis::upgrade_analysis(&mut adapted)?;
            deserialize_capture(adapted)?
        }
        DocumentKind::Analysis => {
            analysis::upgrade_analysis(&mut doc)?;
            deserialize_capture(doc)?
        }
        DocumentKind::RawCapture => {
            raw::upgrade_raw_capture(&mut doc)?;
            build_capture(doc)?
        }
    };

    normalize_counters(&mut capture.counters);

    info!(
        "processed capture: {} threads, {} counters, {} libraries",
        capture.threads.len(),
        capture.counters.len(),
        capture.libs.len()
    );
    Ok(capture)
}

/// Read and process a capture file.
pub fn process_file(input_path: impl AsRef<Path>) -> Result<Capture, PipelineError> {
    let input_path = input_path.as_ref();
    info!("Processing capture file: {}", input_path.display());

    let file = std::fs::File::open(input_path)?;
    let doc: Value =
        serde_json::from_reader(file).map_err(OutputError::SerializationFailed)?;
    process_document(doc)
}
