//! Configuration and constants for the engine.

/// Current version of the raw-capture wire format
pub const RAW_CAPTURE_VERSION: u32 = 8;

/// Oldest raw-capture version the upgrade chain can start from
pub const OLDEST_RAW_CAPTURE_VERSION: u32 = 1;

/// Current version of the normalized-analysis wire format
pub const ANALYSIS_VERSION: u32 = 12;

/// Oldest analysis version the upgrade chain can start from.
/// The legacy pre-versioning adapter emits exactly this version.
pub const OLDEST_ANALYSIS_VERSION: u32 = 5;

/// Version field carried by raw-capture documents (under `meta`)
pub const RAW_VERSION_FIELD: &str = "version";

/// Version field carried by analysis documents (under `meta`)
pub const ANALYSIS_VERSION_FIELD: &str = "preprocessedVersion";

/// Wire field recording the timestamp encoding of an analysis document
pub const TIME_ENCODING_FIELD: &str = "timeEncoding";

// Keys whose presence identifies the legacy pre-versioning format
// (no version field at all, threads carry inline sample lists)
pub const LEGACY_THREAD_SAMPLE_KEY: &str = "sampleList";
pub const LEGACY_THREAD_MARKER_KEY: &str = "markerList";
