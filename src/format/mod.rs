//! Versioned wire-format detection and upgrade pipeline.
//!
//! Two independent chains of pure upgrade steps bring a document to the
//! current version of its format: the raw-capture chain and the
//! normalized-analysis chain. Their version counters and step tables never
//! interact. A structurally distinct legacy format (pre-versioning) is
//! detected heuristically and adapted to the oldest analysis version before
//! the standard chain runs.
//!
//! Each chain is table-driven: states are versions, transitions are upgrade
//! steps `v -> v+1`, the initial state is the document's declared version and
//! the terminal state is the chain's current version. Steps never skip a
//! version, and each step rewrites the version field it owns.

pub mod analysis;
pub mod legacy;
pub mod raw;

use log::debug;
use serde_json::Value;

use crate::utils::config::{ANALYSIS_VERSION_FIELD, RAW_VERSION_FIELD};
use crate::utils::error::FormatError;

/// Which of the supported input formats a document is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Raw capture straight from an instrumented runtime
    RawCapture,
    /// Normalized analysis document (possibly at an old version)
    Analysis,
    /// Pre-versioning legacy document, handled by the dedicated adapter
    Legacy,
}

/// Detect which format chain a document belongs to.
///
/// Raw captures carry `meta.version`; analysis documents carry
/// `meta.preprocessedVersion`. Neither field plus the characteristic legacy
/// thread keys means the legacy adapter applies. Anything else is
/// `UnrecognizedFormat` — no inference is attempted.
pub fn detect_document_kind(doc: &Value) -> Result<DocumentKind, FormatError> {
    let obj = doc.as_object().ok_or(FormatError::UnrecognizedFormat)?;
    if let Some(meta) = obj.get("meta").and_then(Value::as_object) {
        if meta.contains_key(ANALYSIS_VERSION_FIELD) {
            return Ok(DocumentKind::Analysis);
        }
        if meta.contains_key(RAW_VERSION_FIELD) {
            return Ok(DocumentKind::RawCapture);
        }
    }
    if legacy::is_legacy_document(doc) {
        return Ok(DocumentKind::Legacy);
    }
    Err(FormatError::UnrecognizedFormat)
}

/// One upgrade step: transforms the document shape at version v into the
/// shape at version v+1. Steps only see documents of their own chain.
pub(crate) type UpgradeStep = fn(&mut Value) -> Result<(), FormatError>;

/// An ordered table of upgrade steps for one format chain.
///
/// `steps[i]` upgrades version `oldest + i` to `oldest + i + 1`.
pub(crate) struct UpgradeChain {
    pub name: &'static str,
    pub version_field: &'static str,
    pub oldest: u32,
    pub current: u32,
    pub steps: &'static [UpgradeStep],
}

impl UpgradeChain {
    /// Apply upgrade steps sequentially until the document's version equals
    /// `current`. Idempotent once current: a document already at the current
    /// version passes through untouched.
    pub(crate) fn run(&self, doc: &mut Value) -> Result<(), FormatError> {
        let declared = self.read_version(doc)?;
        if declared > self.current {
            return Err(FormatError::FutureVersion {
                found: declared,
                supported: self.current,
            });
        }
        if declared < self.oldest {
            // Versions below the floor of the chain were never emitted as
            // numbered documents (the legacy adapter covers what predates
            // them), so the document cannot be what it claims to be.
            return Err(FormatError::UnrecognizedFormat);
        }
        debug!(
            "{} document at version {declared}, current is {}",
            self.name, self.current
        );
        for version in declared..self.current {
            let step = self.steps[(version - self.oldest) as usize];
            step(doc)?;
            self.write_version(doc, version + 1)?;
            debug!("{}: upgraded version {version} -> {}", self.name, version + 1);
        }
        Ok(())
    }

    fn read_version(&self, doc: &Value) -> Result<u32, FormatError> {
        doc.get("meta")
            .and_then(|m| m.get(self.version_field))
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .ok_or(FormatError::UnrecognizedFormat)
    }

    fn write_version(&self, doc: &mut Value, version: u32) -> Result<(), FormatError> {
        let meta = doc
            .get_mut("meta")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| FormatError::UpgradeFailed {
                version,
                reason: "document lost its meta object".to_string(),
            })?;
        meta.insert(self.version_field.to_string(), version.into());
        Ok(())
    }
}

/// Shorthand for the "this shape can't occur at this version" failure inside
/// an upgrade step.
pub(crate) fn malformed(version: u32, reason: impl Into<String>) -> FormatError {
    FormatError::UpgradeFailed {
        version,
        reason: reason.into(),
    }
}

/// Iterate mutably over the thread objects of a document.
pub(crate) fn threads_mut(doc: &mut Value) -> impl Iterator<Item = &mut serde_json::Map<String, Value>> {
    doc.get_mut("threads")
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object_mut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detect_analysis_document() {
        let doc = json!({"meta": {"preprocessedVersion": 12}, "threads": []});
        assert_eq!(detect_document_kind(&doc).unwrap(), DocumentKind::Analysis);
    }

    #[test]
    fn test_detect_raw_document() {
        let doc = json!({"meta": {"version": 8, "markerSchema": []}, "threads": []});
        assert_eq!(detect_document_kind(&doc).unwrap(), DocumentKind::RawCapture);
    }

    #[test]
    fn test_detect_legacy_document() {
        let doc = json!({"threads": [{"name": "Main", "sampleList": []}]});
        assert_eq!(detect_document_kind(&doc).unwrap(), DocumentKind::Legacy);
    }

    #[test]
    fn test_unrecognized_document_is_rejected() {
        for doc in [json!({"foo": 1}), json!([1, 2, 3]), json!({"meta": {}})] {
            assert!(matches!(
                detect_document_kind(&doc),
                Err(FormatError::UnrecognizedFormat)
            ));
        }
    }

    #[test]
    fn test_analysis_wins_over_raw_when_both_fields_present() {
        // A document carrying both fields is treated as analysis; the raw
        // chain must never see analysis shapes.
        let doc = json!({"meta": {"preprocessedVersion": 12, "version": 8}});
        assert_eq!(detect_document_kind(&doc).unwrap(), DocumentKind::Analysis);
    }
}
