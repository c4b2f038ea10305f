//! Upgrade chain for the normalized-analysis format.
//!
//! Analysis documents carry `meta.preprocessedVersion` and struct-of-arrays
//! tables (one JSON array per column plus a `length` field). The chain
//! covers every numbered historical version; anything older than version 5
//! only ever existed as the pre-versioning legacy format, which the
//! dedicated adapter converts to version 5 before this chain runs.

use std::collections::HashMap;

use log::debug;
use serde_json::{json, Map, Value};

use super::{malformed, threads_mut, UpgradeChain, UpgradeStep};
use crate::utils::config::{ANALYSIS_VERSION, ANALYSIS_VERSION_FIELD, OLDEST_ANALYSIS_VERSION};
use crate::utils::error::FormatError;

/// Upgrade an analysis document in place to [`ANALYSIS_VERSION`].
pub fn upgrade_analysis(doc: &mut Value) -> Result<(), FormatError> {
    ANALYSIS_CHAIN.run(doc)
}

static ANALYSIS_CHAIN: UpgradeChain = UpgradeChain {
    name: "analysis",
    version_field: ANALYSIS_VERSION_FIELD,
    oldest: OLDEST_ANALYSIS_VERSION,
    current: ANALYSIS_VERSION,
    steps: &[
        upgrade_5_to_6,
        upgrade_6_to_7,
        upgrade_7_to_8,
        upgrade_8_to_9,
        upgrade_9_to_10,
        upgrade_10_to_11,
        upgrade_11_to_12,
    ] as &[UpgradeStep],
};

/// v5 -> v6: per-thread library lists are deduplicated and hoisted to
/// capture scope; resource tables are remapped to the merged list.
fn upgrade_5_to_6(doc: &mut Value) -> Result<(), FormatError> {
    let mut capture_libs: Vec<Value> = Vec::new();
    let mut index_of: HashMap<(String, String), usize> = HashMap::new();

    for thread in threads_mut(doc) {
        let thread_libs = match thread.remove("libs") {
            Some(Value::Array(libs)) => libs,
            _ => Vec::new(),
        };
        let mut remap = Vec::with_capacity(thread_libs.len());
        for lib in thread_libs {
            let key = (
                lib.get("debugName").and_then(Value::as_str).unwrap_or("").to_string(),
                lib.get("breakpadID").and_then(Value::as_str).unwrap_or("").to_string(),
            );
            let merged = *index_of.entry(key).or_insert_with(|| {
                capture_libs.push(lib);
                capture_libs.len() - 1
            });
            remap.push(merged);
        }

        let resource_table = struct_table_mut(thread, "resourceTable", 5)?;
        for lib_cell in column_mut(resource_table, "lib", 5)? {
            if let Some(old) = lib_cell.as_u64() {
                let old = old as usize;
                if old >= remap.len() {
                    return Err(malformed(5, format!("resource references lib {old} of a shorter lib list")));
                }
                *lib_cell = json!(remap[old]);
            }
        }
    }

    debug!("hoisted {} deduplicated libraries to capture scope", capture_libs.len());
    doc.as_object_mut()
        .ok_or_else(|| malformed(5, "document is not an object"))?
        .insert("libs".to_string(), Value::Array(capture_libs));
    Ok(())
}

/// v6 -> v7: per-thread string tables merge into one capture-level
/// `shared.stringArray`; every string-index column is remapped.
fn upgrade_6_to_7(doc: &mut Value) -> Result<(), FormatError> {
    let mut shared: Vec<String> = Vec::new();
    let mut index_of: HashMap<String, usize> = HashMap::new();

    for thread in threads_mut(doc) {
        let thread_strings = match thread.remove("stringTable") {
            Some(Value::Array(strings)) => strings,
            _ => return Err(malformed(6, "thread without stringTable")),
        };
        let mut remap = Vec::with_capacity(thread_strings.len());
        for s in thread_strings {
            let s = s.as_str().ok_or_else(|| malformed(6, "non-string in stringTable"))?.to_string();
            let merged = *index_of.entry(s.clone()).or_insert_with(|| {
                shared.push(s);
                shared.len() - 1
            });
            remap.push(merged);
        }

        for (table, column) in [
            ("funcTable", "name"),
            ("funcTable", "fileName"),
            ("resourceTable", "name"),
            ("markers", "name"),
        ] {
            let table = struct_table_mut(thread, table, 6)?;
            for cell in column_mut(table, column, 6)? {
                if let Some(old) = cell.as_u64() {
                    let old = old as usize;
                    if old >= remap.len() {
                        return Err(malformed(6, format!("string index {old} out of range")));
                    }
                    *cell = json!(remap[old]);
                }
            }
        }
    }

    doc.as_object_mut()
        .ok_or_else(|| malformed(6, "document is not an object"))?
        .insert("shared".to_string(), json!({"stringArray": shared}));
    Ok(())
}

/// v7 -> v8: the stack table gains a subcategory column.
fn upgrade_7_to_8(doc: &mut Value) -> Result<(), FormatError> {
    for thread in threads_mut(doc) {
        let stack_table = struct_table_mut(thread, "stackTable", 7)?;
        let length = table_length(stack_table, 7)?;
        stack_table.insert("subcategory".to_string(), json!(vec![0u32; length]));
    }
    Ok(())
}

/// v8 -> v9: samples gain a weight column; the long-unused responsiveness
/// column is dropped.
fn upgrade_8_to_9(doc: &mut Value) -> Result<(), FormatError> {
    for thread in threads_mut(doc) {
        let samples = struct_table_mut(thread, "samples", 8)?;
        let length = table_length(samples, 8)?;
        samples.insert("weight".to_string(), json!(vec![1.0f64; length]));
        samples.remove("responsiveness");
    }
    Ok(())
}

/// v9 -> v10: counters become mandatory and their delta-encoded samples are
/// labelled explicitly: `countDelta` becomes `count` plus `relative: true`.
fn upgrade_9_to_10(doc: &mut Value) -> Result<(), FormatError> {
    let obj = doc
        .as_object_mut()
        .ok_or_else(|| malformed(9, "document is not an object"))?;
    let counters = obj.entry("counters").or_insert_with(|| json!([]));
    for counter in counters.as_array_mut().into_iter().flatten() {
        let Some(counter) = counter.as_object_mut() else {
            continue;
        };
        let samples = counter
            .get_mut("samples")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| malformed(9, "counter without samples"))?;
        if let Some(deltas) = samples.remove("countDelta") {
            samples.insert("count".to_string(), deltas);
            counter.insert("relative".to_string(), json!(true));
        }
    }
    Ok(())
}

/// v10 -> v11: markers move from (time, duration) to (startTime, endTime).
fn upgrade_10_to_11(doc: &mut Value) -> Result<(), FormatError> {
    for thread in threads_mut(doc) {
        let markers = struct_table_mut(thread, "markers", 10)?;
        let times: Vec<f64> = markers
            .get("time")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed(10, "markers without time column"))?
            .iter()
            .map(|t| t.as_f64().unwrap_or(0.0))
            .collect();
        let durations = markers
            .remove("duration")
            .and_then(|d| if let Value::Array(d) = d { Some(d) } else { None })
            .ok_or_else(|| malformed(10, "markers without duration column"))?;
        let end_times: Vec<Value> = durations
            .iter()
            .zip(&times)
            .map(|(duration, time)| match duration.as_f64() {
                Some(d) => json!(time + d),
                None => Value::Null,
            })
            .collect();
        let time = markers
            .remove("time")
            .ok_or_else(|| malformed(10, "markers without time column"))?;
        markers.insert("startTime".to_string(), time);
        markers.insert("endTime".to_string(), Value::Array(end_times));
    }
    Ok(())
}

/// v11 -> v12: `funcTable.fileName` is renamed to `file`, and threads gain
/// an explicit `isMainThread` flag (historically inferred as tid == pid).
fn upgrade_11_to_12(doc: &mut Value) -> Result<(), FormatError> {
    for thread in threads_mut(doc) {
        let is_main = thread.get("tid").and_then(Value::as_u64)
            == thread.get("pid").and_then(Value::as_u64);
        thread.entry("isMainThread").or_insert_with(|| json!(is_main));

        let func_table = struct_table_mut(thread, "funcTable", 11)?;
        if let Some(files) = func_table.remove("fileName") {
            func_table.insert("file".to_string(), files);
        }
    }
    Ok(())
}

// ---- struct-of-arrays helpers -----------------------------------------

fn struct_table_mut<'a>(
    thread: &'a mut Map<String, Value>,
    key: &str,
    version: u32,
) -> Result<&'a mut Map<String, Value>, FormatError> {
    thread
        .get_mut(key)
        .and_then(Value::as_object_mut)
        .ok_or_else(|| malformed(version, format!("thread without {key} table")))
}

fn column_mut<'a>(
    table: &'a mut Map<String, Value>,
    column: &str,
    version: u32,
) -> Result<impl Iterator<Item = &'a mut Value>, FormatError> {
    Ok(table
        .get_mut(column)
        .and_then(Value::as_array_mut)
        .ok_or_else(|| malformed(version, format!("table without {column} column")))?
        .iter_mut())
}

fn table_length(table: &Map<String, Value>, version: u32) -> Result<usize, FormatError> {
    table
        .get("length")
        .and_then(Value::as_u64)
        .map(|l| l as usize)
        .ok_or_else(|| malformed(version, "table without length"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::legacy::tests::minimal_v5_thread;

    fn v5_doc(threads: Vec<Value>) -> Value {
        json!({
            "meta": {"preprocessedVersion": 5, "interval": 1.0, "startTime": 0.0},
            "threads": threads,
        })
    }

    #[test]
    fn test_full_chain_from_v5() {
        let mut doc = v5_doc(vec![minimal_v5_thread("Main", 1, 1)]);
        upgrade_analysis(&mut doc).unwrap();

        assert_eq!(doc["meta"]["preprocessedVersion"], ANALYSIS_VERSION);
        assert!(doc["shared"]["stringArray"].is_array());
        let thread = &doc["threads"][0];
        assert!(thread.get("libs").is_none());
        assert!(thread.get("stringTable").is_none());
        assert!(thread["stackTable"]["subcategory"].is_array());
        assert!(thread["samples"]["weight"].is_array());
        assert!(thread["funcTable"]["file"].is_array());
        assert!(thread["funcTable"].get("fileName").is_none());
        assert_eq!(thread["isMainThread"], true);
        assert_eq!(doc["counters"], json!([]));
    }

    #[test]
    fn test_library_hoisting_deduplicates() {
        let lib = |debug_name: &str| {
            json!({"name": debug_name, "path": "", "debugName": debug_name, "breakpadID": "ID0"})
        };
        let mut t1 = minimal_v5_thread("Main", 1, 1);
        t1["libs"] = json!([lib("libxul.so"), lib("libc.so")]);
        t1["resourceTable"] = json!({"name": [0], "lib": [1], "length": 1});
        let mut t2 = minimal_v5_thread("Worker", 2, 1);
        t2["libs"] = json!([lib("libc.so")]);
        t2["resourceTable"] = json!({"name": [0], "lib": [0], "length": 1});

        let mut doc = v5_doc(vec![t1, t2]);
        upgrade_analysis(&mut doc).unwrap();

        // Three per-thread entries collapse into two capture-level ones.
        let libs = doc["libs"].as_array().unwrap();
        assert_eq!(libs.len(), 2);
        assert_eq!(libs[0]["debugName"], "libxul.so");
        assert_eq!(libs[1]["debugName"], "libc.so");
        // Both threads' resources now point at the shared libc entry.
        assert_eq!(doc["threads"][0]["resourceTable"]["lib"][0], 1);
        assert_eq!(doc["threads"][1]["resourceTable"]["lib"][0], 1);
    }

    #[test]
    fn test_string_hoisting_remaps_indices() {
        let mut t1 = minimal_v5_thread("Main", 1, 1);
        t1["stringTable"] = json!(["alpha", "beta"]);
        t1["funcTable"] = json!({"name": [1], "fileName": [null], "line": [null], "isJS": [false], "resource": [null], "length": 1});
        let mut t2 = minimal_v5_thread("Worker", 2, 1);
        t2["stringTable"] = json!(["beta", "gamma"]);
        t2["funcTable"] = json!({"name": [0], "fileName": [null], "line": [null], "isJS": [false], "resource": [null], "length": 1});

        let mut doc = v5_doc(vec![t1, t2]);
        upgrade_analysis(&mut doc).unwrap();

        assert_eq!(doc["shared"]["stringArray"], json!(["alpha", "beta", "gamma"]));
        // Both funcs named "beta" resolve to the same shared index.
        assert_eq!(doc["threads"][0]["funcTable"]["name"][0], 1);
        assert_eq!(doc["threads"][1]["funcTable"]["name"][0], 1);
    }

    #[test]
    fn test_counter_deltas_become_relative() {
        let mut doc = v5_doc(vec![]);
        doc["counters"] = json!([{
            "name": "malloc", "category": "Memory", "pid": 1,
            "samples": {"time": [0.0, 1.0], "countDelta": [0.0, 5.0], "length": 2},
        }]);
        upgrade_analysis(&mut doc).unwrap();

        let counter = &doc["counters"][0];
        assert_eq!(counter["relative"], true);
        assert_eq!(counter["samples"]["count"], json!([0.0, 5.0]));
        assert!(counter["samples"].get("countDelta").is_none());
    }

    #[test]
    fn test_markers_gain_end_times() {
        let mut thread = minimal_v5_thread("Main", 1, 1);
        thread["markers"] = json!({
            "name": [0, 0], "time": [1.0, 4.0], "duration": [0.5, null],
            "stack": [null, null], "length": 2,
        });
        let mut doc = v5_doc(vec![thread]);
        upgrade_analysis(&mut doc).unwrap();

        let markers = &doc["threads"][0]["markers"];
        assert_eq!(markers["startTime"], json!([1.0, 4.0]));
        assert_eq!(markers["endTime"], json!([1.5, null]));
        assert!(markers.get("duration").is_none());
    }

    #[test]
    fn test_future_analysis_version_is_rejected() {
        let mut doc = json!({"meta": {"preprocessedVersion": ANALYSIS_VERSION + 3}});
        assert!(matches!(
            upgrade_analysis(&mut doc),
            Err(FormatError::FutureVersion { found, .. }) if found == ANALYSIS_VERSION + 3
        ));
    }
}
