//! Adapter for the legacy pre-versioning capture format.
//!
//! Before formats were numbered, captures stored each sample as an inline
//! list of frame names (`sampleList`) and markers as plain objects
//! (`markerList`). There is no version field to dispatch on, so this format
//! is detected structurally and converted by a single dedicated adapter into
//! the oldest numbered analysis document; the standard chain takes over from
//! there.

use std::collections::HashMap;

use log::debug;
use serde_json::{json, Value};

use crate::utils::config::{
    LEGACY_THREAD_MARKER_KEY, LEGACY_THREAD_SAMPLE_KEY, OLDEST_ANALYSIS_VERSION,
};
use crate::utils::error::FormatError;

/// Heuristic discriminant for the legacy format: no version field anywhere,
/// and every thread carries the characteristic inline sample list.
pub fn is_legacy_document(doc: &Value) -> bool {
    let Some(obj) = doc.as_object() else {
        return false;
    };
    if let Some(meta) = obj.get("meta").and_then(Value::as_object) {
        if meta.contains_key("version") || meta.contains_key("preprocessedVersion") {
            return false;
        }
    }
    let Some(threads) = obj.get("threads").and_then(Value::as_array) else {
        return false;
    };
    !threads.is_empty()
        && threads
            .iter()
            .all(|t| t.get(LEGACY_THREAD_SAMPLE_KEY).is_some())
}

/// Convert a legacy document into an analysis document at
/// [`OLDEST_ANALYSIS_VERSION`].
///
/// Each thread's inline frame-name lists become proper string, func, frame
/// and stack tables; sample chains share stack rows through prefix dedup,
/// exactly like natively recorded captures.
pub fn adapt_legacy_document(doc: &Value) -> Result<Value, FormatError> {
    let obj = doc.as_object().ok_or(FormatError::UnrecognizedFormat)?;
    let threads = obj
        .get("threads")
        .and_then(Value::as_array)
        .ok_or(FormatError::UnrecognizedFormat)?;

    let adapted_threads = threads
        .iter()
        .enumerate()
        .map(|(i, thread)| adapt_thread(thread, i))
        .collect::<Result<Vec<Value>, FormatError>>()?;

    debug!("adapted legacy document with {} threads", adapted_threads.len());
    Ok(json!({
        "meta": {
            "preprocessedVersion": OLDEST_ANALYSIS_VERSION,
            "interval": obj.get("interval").and_then(Value::as_f64).unwrap_or(1.0),
            "startTime": obj.get("startTime").and_then(Value::as_f64).unwrap_or(0.0),
            "product": obj.get("product").and_then(Value::as_str).unwrap_or(""),
        },
        "threads": adapted_threads,
    }))
}

fn adapt_thread(thread: &Value, index: usize) -> Result<Value, FormatError> {
    let legacy_error = |reason: &str| FormatError::UpgradeFailed {
        version: OLDEST_ANALYSIS_VERSION,
        reason: format!("legacy thread {index}: {reason}"),
    };
    let thread = thread
        .as_object()
        .ok_or_else(|| legacy_error("not an object"))?;

    let mut strings: Vec<String> = Vec::new();
    let mut string_index: HashMap<String, usize> = HashMap::new();
    let mut intern = |s: &str, strings: &mut Vec<String>| -> usize {
        *string_index.entry(s.to_string()).or_insert_with(|| {
            strings.push(s.to_string());
            strings.len() - 1
        })
    };

    // One func and one frame per unique name; legacy captures carried no
    // addresses or source locations.
    let mut func_names: Vec<usize> = Vec::new();
    let mut func_index: HashMap<usize, usize> = HashMap::new();
    // Stack rows deduplicated by (prefix, frame), shared across samples.
    let mut stack_frames: Vec<usize> = Vec::new();
    let mut stack_prefixes: Vec<Value> = Vec::new();
    let mut stack_index: HashMap<(Option<usize>, usize), usize> = HashMap::new();

    let mut sample_stacks: Vec<Value> = Vec::new();
    let mut sample_times: Vec<Value> = Vec::new();

    let samples = thread
        .get(LEGACY_THREAD_SAMPLE_KEY)
        .and_then(Value::as_array)
        .ok_or_else(|| legacy_error("sampleList is not an array"))?;
    for sample in samples {
        let frames = sample
            .get("frames")
            .and_then(Value::as_array)
            .ok_or_else(|| legacy_error("sample without frames"))?;
        let mut prefix: Option<usize> = None;
        for frame_name in frames {
            let name = frame_name
                .as_str()
                .ok_or_else(|| legacy_error("frame name is not a string"))?;
            let name_index = intern(name, &mut strings);
            let func = *func_index.entry(name_index).or_insert_with(|| {
                func_names.push(name_index);
                func_names.len() - 1
            });
            // frame index == func index by construction
            let stack = *stack_index.entry((prefix, func)).or_insert_with(|| {
                stack_frames.push(func);
                stack_prefixes.push(prefix.map_or(Value::Null, |p| json!(p)));
                stack_frames.len() - 1
            });
            prefix = Some(stack);
        }
        sample_stacks.push(prefix.map_or(Value::Null, |s| json!(s)));
        sample_times.push(sample.get("time").cloned().unwrap_or(json!(0.0)));
    }

    let mut marker_names: Vec<Value> = Vec::new();
    let mut marker_times: Vec<Value> = Vec::new();
    let mut marker_durations: Vec<Value> = Vec::new();
    if let Some(markers) = thread.get(LEGACY_THREAD_MARKER_KEY).and_then(Value::as_array) {
        for marker in markers {
            let name = marker
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| legacy_error("marker without name"))?;
            marker_names.push(json!(intern(name, &mut strings)));
            marker_times.push(marker.get("time").cloned().unwrap_or(json!(0.0)));
            marker_durations.push(marker.get("duration").cloned().unwrap_or(Value::Null));
        }
    }

    let func_count = func_names.len();
    let stack_count = stack_frames.len();
    let marker_count = marker_names.len();
    Ok(json!({
        "name": thread.get("name").and_then(Value::as_str).unwrap_or("Unknown"),
        "tid": thread.get("tid").and_then(Value::as_u64).unwrap_or(index as u64),
        "pid": thread.get("pid").and_then(Value::as_u64).unwrap_or(0),
        "libs": [],
        "stringTable": strings,
        "funcTable": {
            "name": func_names,
            "fileName": vec![Value::Null; func_count],
            "line": vec![Value::Null; func_count],
            "isJS": vec![false; func_count],
            "resource": vec![Value::Null; func_count],
            "length": func_count,
        },
        "frameTable": {
            "func": (0..func_count).collect::<Vec<usize>>(),
            "address": vec![Value::Null; func_count],
            "line": vec![Value::Null; func_count],
            "length": func_count,
        },
        "stackTable": {
            "frame": stack_frames,
            "prefix": stack_prefixes,
            "category": vec![0u32; stack_count],
            "length": stack_count,
        },
        "resourceTable": {"name": [], "lib": [], "length": 0},
        "samples": {
            "stack": sample_stacks,
            "time": sample_times,
            "length": samples.len(),
        },
        "markers": {
            "name": marker_names,
            "time": marker_times,
            "duration": marker_durations,
            "stack": vec![Value::Null; marker_count],
            "length": marker_count,
        },
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A minimal, well-formed thread at analysis version 5, shared with the
    /// analysis-chain tests.
    pub(crate) fn minimal_v5_thread(name: &str, tid: u64, pid: u64) -> Value {
        json!({
            "name": name, "tid": tid, "pid": pid,
            "libs": [],
            "stringTable": ["root"],
            "funcTable": {"name": [0], "fileName": [null], "line": [null], "isJS": [false], "resource": [null], "length": 1},
            "frameTable": {"func": [0], "address": [null], "line": [null], "length": 1},
            "stackTable": {"frame": [0], "prefix": [null], "category": [0], "length": 1},
            "resourceTable": {"name": [], "lib": [], "length": 0},
            "samples": {"stack": [0], "time": [0.0], "length": 1},
            "markers": {"name": [], "time": [], "duration": [], "stack": [], "length": 0},
        })
    }

    fn legacy_doc() -> Value {
        json!({
            "startTime": 100.0,
            "interval": 2.0,
            "threads": [{
                "name": "Main", "tid": 5, "pid": 5,
                "sampleList": [
                    {"time": 0.0, "frames": ["main", "work"]},
                    {"time": 1.0, "frames": ["main", "work", "inner"]},
                    {"time": 2.0, "frames": ["main", "idle"]},
                ],
                "markerList": [{"name": "GC", "time": 0.5, "duration": 0.25}],
            }],
        })
    }

    #[test]
    fn test_legacy_detection() {
        assert!(is_legacy_document(&legacy_doc()));
        assert!(!is_legacy_document(&json!({"meta": {"version": 3}, "threads": []})));
        assert!(!is_legacy_document(&json!({"threads": []})));
        assert!(!is_legacy_document(&json!({"threads": [{"samples": []}]})));
    }

    #[test]
    fn test_adapter_emits_oldest_analysis_version() {
        let adapted = adapt_legacy_document(&legacy_doc()).unwrap();
        assert_eq!(adapted["meta"]["preprocessedVersion"], OLDEST_ANALYSIS_VERSION);
        assert_eq!(adapted["meta"]["startTime"], 100.0);
        assert_eq!(adapted["meta"]["interval"], 2.0);
    }

    #[test]
    fn test_adapter_builds_shared_prefix_chains() {
        let adapted = adapt_legacy_document(&legacy_doc()).unwrap();
        let thread = &adapted["threads"][0];

        // main, work, inner, idle
        assert_eq!(thread["funcTable"]["length"], 4);
        // main; main->work; main->work->inner; main->idle
        assert_eq!(thread["stackTable"]["length"], 4);
        // Samples 0 and 1 share the main->work prefix rows.
        let stacks = thread["samples"]["stack"].as_array().unwrap();
        assert_eq!(stacks.len(), 3);
        let prefix_of = |s: u64| thread["stackTable"]["prefix"][s as usize].clone();
        assert_eq!(prefix_of(stacks[1].as_u64().unwrap()), json!(1));

        // Marker name landed in the string table.
        let strings = thread["stringTable"].as_array().unwrap();
        let gc_index = strings.iter().position(|s| s == "GC").unwrap();
        assert_eq!(thread["markers"]["name"][0], gc_index);
    }

    #[test]
    fn test_adapted_document_upgrades_cleanly() {
        let mut adapted = adapt_legacy_document(&legacy_doc()).unwrap();
        crate::format::analysis::upgrade_analysis(&mut adapted).unwrap();
        assert_eq!(
            adapted["meta"]["preprocessedVersion"],
            crate::utils::config::ANALYSIS_VERSION
        );
    }
}
