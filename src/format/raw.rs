//! Upgrade chain for the raw-capture format.
//!
//! Raw captures carry `meta.version` and per-thread tables in the compact
//! `{"schema": {column: position}, "data": [[...], ...]}` tuple form. The
//! current shape expected by the table builder is version 8:
//!
//! - `meta`: `version`, `interval`, `startTime`, `markerSchema`
//! - `libs`: capture-level library list
//! - `threads[]`: `stringTable`, `frameTable {location, lib, line}`,
//!   `stackTable {prefix, frame, category, subcategory}`,
//!   `samples {stack, time, weight}`,
//!   `markers {name, startTime, endTime, stack}`
//! - `counters[]`: `samples {time, count}` plus a `relative` flag

use serde_json::{json, Map, Value};

use super::{malformed, threads_mut, UpgradeChain, UpgradeStep};
use crate::utils::config::{OLDEST_RAW_CAPTURE_VERSION, RAW_CAPTURE_VERSION, RAW_VERSION_FIELD};
use crate::utils::error::FormatError;

/// Upgrade a raw-capture document in place to [`RAW_CAPTURE_VERSION`].
pub fn upgrade_raw_capture(doc: &mut Value) -> Result<(), FormatError> {
    RAW_CHAIN.run(doc)
}

static RAW_CHAIN: UpgradeChain = UpgradeChain {
    name: "raw-capture",
    version_field: RAW_VERSION_FIELD,
    oldest: OLDEST_RAW_CAPTURE_VERSION,
    current: RAW_CAPTURE_VERSION,
    steps: &[
        upgrade_1_to_2,
        upgrade_2_to_3,
        upgrade_3_to_4,
        upgrade_4_to_5,
        upgrade_5_to_6,
        upgrade_6_to_7,
        upgrade_7_to_8,
    ] as &[UpgradeStep],
};

/// v1 -> v2: samples and markers move from arrays of objects to the
/// schema/data tuple form used by every later version.
fn upgrade_1_to_2(doc: &mut Value) -> Result<(), FormatError> {
    for thread in threads_mut(doc) {
        let samples = thread
            .get("samples")
            .and_then(Value::as_array)
            .ok_or_else(|| malformed(1, "thread without samples array"))?;
        let sample_rows: Vec<Value> = samples
            .iter()
            .map(|s| json!([s.get("stack").cloned().unwrap_or(Value::Null), s["time"]]))
            .collect();
        thread.insert(
            "samples".to_string(),
            json!({"schema": {"stack": 0, "time": 1}, "data": sample_rows}),
        );

        let markers = thread
            .get("markers")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let marker_rows: Vec<Value> = markers
            .iter()
            .map(|m| {
                json!([
                    m["name"],
                    m["time"],
                    m.get("duration").cloned().unwrap_or(Value::Null),
                    m.get("stack").cloned().unwrap_or(Value::Null),
                ])
            })
            .collect();
        thread.insert(
            "markers".to_string(),
            json!({
                "schema": {"name": 0, "time": 1, "duration": 2, "stack": 3},
                "data": marker_rows,
            }),
        );
    }
    Ok(())
}

/// v2 -> v3: samples gain a weight column; historical captures weighted
/// every sample equally.
fn upgrade_2_to_3(doc: &mut Value) -> Result<(), FormatError> {
    for thread in threads_mut(doc) {
        let samples = tuple_table_mut(thread, "samples", 2)?;
        add_column(samples, "weight", json!(1.0), 2)?;
    }
    Ok(())
}

/// v3 -> v4: nested subprocess documents are flattened. Each entry of
/// `processes` carried its own `threads` and `libs`; threads move to the
/// top-level list with their pid set, and their frame-table lib indices are
/// offset past the libraries merged into the top-level list.
fn upgrade_3_to_4(doc: &mut Value) -> Result<(), FormatError> {
    // Subprocesses can nest further subprocesses, so drain a worklist.
    let mut pending: Vec<Value> = match doc.get_mut("processes").map(Value::take) {
        Some(Value::Array(list)) => list,
        _ => Vec::new(),
    };
    doc.as_object_mut()
        .ok_or_else(|| malformed(3, "document is not an object"))?
        .remove("processes");

    while let Some(mut process) = pending.pop() {
        let lib_offset = doc
            .get("libs")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        if let Some(libs) = process.get_mut("libs").and_then(Value::as_array_mut) {
            let target = doc
                .get_mut("libs")
                .and_then(Value::as_array_mut)
                .ok_or_else(|| malformed(3, "document without libs array"))?;
            target.append(libs);
        }
        let pid = process.get("pid").cloned().unwrap_or(Value::Null);
        if let Some(threads) = process.get_mut("threads").and_then(Value::as_array_mut) {
            for thread in threads.iter_mut() {
                if let Some(obj) = thread.as_object_mut() {
                    obj.insert("pid".to_string(), pid.clone());
                    offset_lib_column(obj, lib_offset)?;
                }
                doc.get_mut("threads")
                    .and_then(Value::as_array_mut)
                    .ok_or_else(|| malformed(3, "document without threads array"))?
                    .push(thread.take());
            }
        }
        if let Some(Value::Array(nested)) = process.get_mut("processes").map(Value::take) {
            pending.extend(nested);
        }
    }
    Ok(())
}

/// v4 -> v5: the stack table gains category and subcategory columns.
fn upgrade_4_to_5(doc: &mut Value) -> Result<(), FormatError> {
    for thread in threads_mut(doc) {
        let stack_table = tuple_table_mut(thread, "stackTable", 4)?;
        add_column(stack_table, "category", json!(0), 4)?;
        add_column(stack_table, "subcategory", json!(0), 4)?;
    }
    Ok(())
}

/// v5 -> v6: the frame table gains a line column; older recorders only
/// emitted location strings.
fn upgrade_5_to_6(doc: &mut Value) -> Result<(), FormatError> {
    for thread in threads_mut(doc) {
        let frame_table = tuple_table_mut(thread, "frameTable", 5)?;
        add_column(frame_table, "line", Value::Null, 5)?;
    }
    Ok(())
}

/// v6 -> v7: markers move from (time, duration) to (startTime, endTime).
/// A missing duration means an instant marker, which has no end time.
fn upgrade_6_to_7(doc: &mut Value) -> Result<(), FormatError> {
    for thread in threads_mut(doc) {
        let markers = tuple_table_mut(thread, "markers", 6)?;
        let time_col = schema_column(markers, "time")
            .ok_or_else(|| malformed(6, "markers without time column"))?;
        let duration_col = schema_column(markers, "duration")
            .ok_or_else(|| malformed(6, "markers without duration column"))?;
        for row in data_rows_mut(markers, 6)? {
            let row = row
                .as_array_mut()
                .ok_or_else(|| malformed(6, "marker row is not an array"))?;
            let time = row[time_col].as_f64().unwrap_or(0.0);
            let end = row[duration_col].as_f64().map(|d| json!(time + d));
            row[duration_col] = end.unwrap_or(Value::Null);
        }
        rename_schema_column(markers, "time", "startTime", 6)?;
        rename_schema_column(markers, "duration", "endTime", 6)?;
    }
    Ok(())
}

/// v7 -> v8: `meta.markerSchema` becomes mandatory, the counter list becomes
/// mandatory, and counters lose their sample-group wrapper.
fn upgrade_7_to_8(doc: &mut Value) -> Result<(), FormatError> {
    let meta = doc
        .get_mut("meta")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| malformed(7, "document without meta object"))?;
    meta.entry("markerSchema").or_insert_with(|| json!([]));

    let obj = doc
        .as_object_mut()
        .ok_or_else(|| malformed(7, "document is not an object"))?;
    let counters = obj.entry("counters").or_insert_with(|| json!([]));
    for counter in counters.as_array_mut().into_iter().flatten() {
        let Some(counter) = counter.as_object_mut() else {
            continue;
        };
        if let Some(mut groups) = counter.remove("sampleGroups") {
            let samples = groups
                .get_mut(0)
                .and_then(|g| g.get_mut("samples"))
                .map(Value::take)
                .ok_or_else(|| malformed(7, "counter sampleGroups without samples"))?;
            counter.insert("samples".to_string(), samples);
        }
    }
    Ok(())
}

// ---- tuple-table helpers ----------------------------------------------

/// Access a thread table in schema/data tuple form.
pub(crate) fn tuple_table_mut<'a>(
    thread: &'a mut Map<String, Value>,
    key: &str,
    version: u32,
) -> Result<&'a mut Map<String, Value>, FormatError> {
    thread
        .get_mut(key)
        .and_then(Value::as_object_mut)
        .ok_or_else(|| malformed(version, format!("thread without {key} table")))
}

/// The position of a named column in a tuple table's schema.
pub(crate) fn schema_column(table: &Map<String, Value>, name: &str) -> Option<usize> {
    table
        .get("schema")
        .and_then(|s| s.get(name))
        .and_then(Value::as_u64)
        .map(|c| c as usize)
}

fn data_rows_mut<'a>(
    table: &'a mut Map<String, Value>,
    version: u32,
) -> Result<&'a mut Vec<Value>, FormatError> {
    table
        .get_mut("data")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| malformed(version, "table without data rows"))
}

/// Append a new column: registered at the next schema position, filled with
/// `fill` in every existing row.
fn add_column(
    table: &mut Map<String, Value>,
    name: &str,
    fill: Value,
    version: u32,
) -> Result<(), FormatError> {
    let schema = table
        .get_mut("schema")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| malformed(version, "table without schema"))?;
    let position = schema.len();
    schema.insert(name.to_string(), position.into());
    for row in data_rows_mut(table, version)? {
        row.as_array_mut()
            .ok_or_else(|| malformed(version, "table row is not an array"))?
            .push(fill.clone());
    }
    Ok(())
}

fn rename_schema_column(
    table: &mut Map<String, Value>,
    from: &str,
    to: &str,
    version: u32,
) -> Result<(), FormatError> {
    let schema = table
        .get_mut("schema")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| malformed(version, "table without schema"))?;
    let position = schema
        .remove(from)
        .ok_or_else(|| malformed(version, format!("schema without {from} column")))?;
    schema.insert(to.to_string(), position);
    Ok(())
}

/// Offset every non-null value of the frame table's lib column, used when
/// merging subprocess library lists.
fn offset_lib_column(
    thread: &mut Map<String, Value>,
    offset: usize,
) -> Result<(), FormatError> {
    if offset == 0 {
        return Ok(());
    }
    let frame_table = tuple_table_mut(thread, "frameTable", 3)?;
    let lib_col = schema_column(frame_table, "lib")
        .ok_or_else(|| malformed(3, "frameTable without lib column"))?;
    for row in data_rows_mut(frame_table, 3)? {
        let row = row
            .as_array_mut()
            .ok_or_else(|| malformed(3, "frame row is not an array"))?;
        if let Some(lib) = row[lib_col].as_u64() {
            row[lib_col] = json!(lib + offset as u64);
        }
    }
    Ok(())
}
