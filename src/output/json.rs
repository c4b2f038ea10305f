//! JSON capture reader/writer.
//!
//! Serializes a normalized [`Capture`] to a JSON file and reads one back.
//! Timestamps can be written either as absolute milliseconds or
//! delta-encoded against the previous row, which compresses well for
//! regularly sampled captures. The encoding is recorded in
//! `meta.timeEncoding` and is purely a wire concern: reading always yields
//! absolute timestamps and strips the field.

use crate::tables::Capture;
use crate::utils::config::TIME_ENCODING_FIELD;
use crate::utils::error::OutputError;
use log::{debug, info};
use serde_json::Value;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// How timestamp columns are stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampEncoding {
    /// Every timestamp is an absolute value in milliseconds.
    #[default]
    Absolute,
    /// The first timestamp of each column is absolute; each subsequent one
    /// is the difference from its predecessor.
    Delta,
}

/// Serialize a capture to a JSON document with the requested timestamp
/// encoding.
///
/// **Public** - also used directly by tests and in-memory consumers
pub fn serialize_capture(
    capture: &Capture,
    encoding: TimestampEncoding,
) -> Result<Value, OutputError> {
    let mut doc = serde_json::to_value(capture)?;
    if encoding == TimestampEncoding::Delta {
        for_each_time_column(&mut doc, delta_encode);
        doc["meta"][TIME_ENCODING_FIELD] = Value::String("delta".to_string());
    }
    Ok(doc)
}

/// Deserialize a capture document, decoding delta timestamps if the
/// document declares them.
///
/// The `timeEncoding` marker is consumed here; the resulting [`Capture`]
/// always holds absolute timestamps.
pub fn deserialize_capture(mut doc: Value) -> Result<Capture, OutputError> {
    let is_delta = doc["meta"][TIME_ENCODING_FIELD].as_str() == Some("delta");
    if is_delta {
        for_each_time_column(&mut doc, delta_decode);
        if let Some(meta) = doc["meta"].as_object_mut() {
            meta.remove(TIME_ENCODING_FIELD);
        }
    }
    Ok(serde_json::from_value(doc)?)
}

/// Write a capture to a JSON file
///
/// **Public** - main entry point for file output
///
/// # Errors
/// * `OutputError::WriteFailed` - I/O error during write
/// * `OutputError::SerializationFailed` - JSON serialization error
/// * `OutputError::InvalidPath` - Path cannot be created or is invalid
pub fn write_capture(
    capture: &Capture,
    output_path: impl AsRef<Path>,
    encoding: TimestampEncoding,
) -> Result<(), OutputError> {
    let output_path = output_path.as_ref();

    info!("Writing capture to: {}", output_path.display());

    validate_output_path(output_path)?;

    if let Some(parent) = output_path.parent() {
        if !parent.exists() {
            debug!("Creating parent directories: {}", parent.display());
            std::fs::create_dir_all(parent).map_err(|e| {
                OutputError::InvalidPath(format!(
                    "Cannot create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    let doc = serialize_capture(capture, encoding)?;

    let file = File::create(output_path).map_err(OutputError::WriteFailed)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &doc).map_err(OutputError::SerializationFailed)?;

    info!(
        "Capture written successfully ({} bytes)",
        calculate_file_size(output_path)
    );

    Ok(())
}

/// Read a capture from a JSON file, decoding delta timestamps if present
///
/// **Public** - used by the validate command and tests
pub fn read_capture(input_path: impl AsRef<Path>) -> Result<Capture, OutputError> {
    let input_path = input_path.as_ref();

    debug!("Reading capture from: {}", input_path.display());

    let file = File::open(input_path).map_err(OutputError::ReadFailed)?;
    let doc: Value = serde_json::from_reader(file).map_err(OutputError::SerializationFailed)?;
    let capture = deserialize_capture(doc)?;

    debug!(
        "Capture loaded: version {}, {} threads",
        capture.meta.preprocessed_version,
        capture.threads.len()
    );

    Ok(capture)
}

/// Apply `f` to every timestamp column of the document: sample times,
/// marker start times, and counter sample times.
///
/// Marker end times stay absolute; they are sparse (nullable) and do not
/// form a monotone sequence.
fn for_each_time_column(doc: &mut Value, f: fn(&mut [Value])) {
    if let Some(threads) = doc["threads"].as_array_mut() {
        for thread in threads {
            if let Some(times) = thread["samples"]["time"].as_array_mut() {
                f(times);
            }
            if let Some(times) = thread["markers"]["startTime"].as_array_mut() {
                f(times);
            }
        }
    }
    if let Some(counters) = doc["counters"].as_array_mut() {
        for counter in counters {
            if let Some(times) = counter["samples"]["time"].as_array_mut() {
                f(times);
            }
        }
    }
}

fn delta_encode(column: &mut [Value]) {
    let mut previous = 0.0;
    for cell in column.iter_mut() {
        if let Some(time) = cell.as_f64() {
            *cell = Value::from(time - previous);
            previous = time;
        }
    }
}

fn delta_decode(column: &mut [Value]) {
    let mut absolute = 0.0;
    for cell in column.iter_mut() {
        if let Some(delta) = cell.as_f64() {
            absolute += delta;
            *cell = Value::from(absolute);
        }
    }
}

/// Validate that output path is writable
///
/// **Private** - internal validation
fn validate_output_path(path: &Path) -> Result<(), OutputError> {
    if path.as_os_str().is_empty() {
        return Err(OutputError::InvalidPath("Path is empty".to_string()));
    }

    if path.exists() && path.is_dir() {
        return Err(OutputError::InvalidPath(format!(
            "Path is a directory: {}",
            path.display()
        )));
    }

    Ok(())
}

/// Calculate file size in bytes
///
/// **Private** - internal utility
fn calculate_file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
