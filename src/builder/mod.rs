//! Builds normalized per-thread tables from an upgraded raw capture.
//!
//! Consumes a raw-capture document at the current raw version and produces a
//! [`Capture`]: deduplicated capture-level libraries, one shared string
//! table, and columnar func/frame/stack/sample/marker tables per thread.

use std::collections::HashMap;

use chrono::Utc;
use log::{debug, info};
use serde::Deserialize;
use serde_json::Value;

use crate::string_table::{StringIndex, StringTable};
use crate::tables::counters::{Counter, CounterSamplesTable};
use crate::tables::thread::{
    FrameTable, FuncTable, MarkerTable, ResourceTable, SamplesTable, StackTable, Thread,
};
use crate::tables::{Capture, CaptureMeta, Library, SharedData};
use crate::utils::config::ANALYSIS_VERSION;
use crate::utils::error::{PipelineError, TableError};

/// Raw capture document at [`crate::utils::config::RAW_CAPTURE_VERSION`].
#[derive(Debug, Deserialize)]
struct RawCapture {
    meta: RawMeta,
    #[serde(default)]
    libs: Vec<Library>,
    threads: Vec<RawThread>,
    #[serde(default)]
    counters: Vec<RawCounter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMeta {
    interval: f64,
    start_time: f64,
    #[serde(default)]
    product: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawThread {
    name: String,
    #[serde(default)]
    tid: u32,
    #[serde(default)]
    pid: u32,
    #[serde(default)]
    is_main_thread: Option<bool>,
    string_table: Vec<String>,
    frame_table: TupleTable,
    stack_table: TupleTable,
    samples: TupleTable,
    markers: TupleTable,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCounter {
    name: String,
    category: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    pid: u32,
    #[serde(default)]
    relative: bool,
    samples: TupleTable,
}

/// A table in the raw format's schema/data tuple form.
#[derive(Debug, Deserialize)]
struct TupleTable {
    schema: HashMap<String, usize>,
    data: Vec<Vec<Value>>,
}

impl TupleTable {
    fn column(&self, name: &str) -> Option<usize> {
        self.schema.get(name).copied()
    }

    fn cell<'a>(&'a self, row: &'a [Value], name: &str) -> &'a Value {
        self.column(name)
            .and_then(|c| row.get(c))
            .unwrap_or(&Value::Null)
    }
}

/// Build a normalized capture from an upgraded raw-capture document.
///
/// Table-building failures abort the whole capture: no partial output is
/// ever returned from here.
pub fn build_capture(doc: Value) -> Result<Capture, PipelineError> {
    let raw: RawCapture = serde_json::from_value(doc)
        .map_err(crate::utils::error::FormatError::JsonError)?;

    // Libraries are deduplicated at capture scope; threads reference them
    // through the remap.
    let mut libs: Vec<Library> = Vec::new();
    let mut lib_index: HashMap<(String, String), usize> = HashMap::new();
    let mut lib_remap = Vec::with_capacity(raw.libs.len());
    for lib in raw.libs {
        let (debug_name, breakpad_id) = lib.key();
        let key = (debug_name.to_string(), breakpad_id.to_string());
        let merged = *lib_index.entry(key).or_insert_with(|| {
            libs.push(lib);
            libs.len() - 1
        });
        lib_remap.push(merged);
    }

    let mut strings = StringTable::new();
    let mut threads = Vec::with_capacity(raw.threads.len());
    for (index, raw_thread) in raw.threads.into_iter().enumerate() {
        let thread = build_thread(raw_thread, index, &mut strings, &lib_remap, &libs)?;
        threads.push(thread);
    }

    let counters = raw
        .counters
        .into_iter()
        .map(build_counter)
        .collect::<Result<Vec<Counter>, PipelineError>>()?;

    info!(
        "built capture: {} threads, {} libraries, {} strings",
        threads.len(),
        libs.len(),
        strings.len()
    );
    Ok(Capture {
        meta: CaptureMeta {
            preprocessed_version: ANALYSIS_VERSION,
            interval: raw.meta.interval,
            start_time: raw.meta.start_time,
            product: raw.meta.product,
            generated_at: Some(Utc::now().to_rfc3339()),
        },
        libs,
        shared: SharedData {
            string_array: strings,
        },
        threads,
        counters,
    })
}

fn build_thread(
    raw: RawThread,
    thread_index: usize,
    strings: &mut StringTable,
    lib_remap: &[usize],
    libs: &[Library],
) -> Result<Thread, PipelineError> {
    let dangling = |table: &'static str, row: usize, column: &'static str, value: usize| {
        PipelineError::Table(TableError::DanglingReference {
            thread: thread_index,
            table,
            row,
            column,
            value,
        })
    };

    // Remap of the raw per-thread string table into the shared one.
    let string_remap: Vec<StringIndex> =
        raw.string_table.iter().map(|s| strings.intern(s)).collect();
    let thread_string = |raw_index: usize| -> Option<StringIndex> {
        string_remap.get(raw_index).copied()
    };

    let mut func_table = FuncTable::default();
    let mut frame_table = FrameTable::default();
    let mut resource_table = ResourceTable::default();
    // Funcs dedup by (name, resource); resources dedup per referenced lib.
    let mut func_index: HashMap<(StringIndex, Option<usize>), usize> = HashMap::new();
    let mut resource_of_lib: HashMap<usize, usize> = HashMap::new();

    for (row, data) in raw.frame_table.data.iter().enumerate() {
        let location_index = raw
            .frame_table
            .cell(data, "location")
            .as_u64()
            .ok_or_else(|| dangling("frameTable", row, "location", usize::MAX))?
            as usize;
        let name_index = thread_string(location_index)
            .ok_or_else(|| dangling("frameTable", row, "location", location_index))?;
        let location = strings.get(name_index).unwrap_or("").to_string();

        let resource = match raw.frame_table.cell(data, "lib").as_u64() {
            Some(raw_lib) => {
                let raw_lib = raw_lib as usize;
                let lib = *lib_remap
                    .get(raw_lib)
                    .ok_or_else(|| dangling("frameTable", row, "lib", raw_lib))?;
                let resource = *resource_of_lib.entry(lib).or_insert_with(|| {
                    let name = strings.intern(&libs[lib].name);
                    resource_table.push(name, Some(lib))
                });
                Some(resource)
            }
            None => None,
        };

        let parsed = parse_location(&location);
        let line = raw
            .frame_table
            .cell(data, "line")
            .as_u64()
            .map(|l| l as u32)
            .or(parsed.line);

        let name = match parsed.name {
            Some(name) => strings.intern(name),
            None => name_index,
        };
        let func = *func_index.entry((name, resource)).or_insert_with(|| {
            let file = parsed.file.map(|f| strings.intern(f));
            func_table.push(name, file, parsed.line, parsed.is_js, resource)
        });
        frame_table.push(func, parsed.address, line);
    }

    let mut stack_table = StackTable::default();
    let stack_count = raw.stack_table.data.len();
    for (row, data) in raw.stack_table.data.iter().enumerate() {
        let frame = raw
            .stack_table
            .cell(data, "frame")
            .as_u64()
            .ok_or_else(|| dangling("stackTable", row, "frame", usize::MAX))?
            as usize;
        if frame >= frame_table.length {
            return Err(dangling("stackTable", row, "frame", frame));
        }
        let prefix = match raw.stack_table.cell(data, "prefix").as_u64() {
            Some(prefix) => {
                let prefix = prefix as usize;
                if prefix >= stack_count {
                    return Err(dangling("stackTable", row, "prefix", prefix));
                }
                Some(prefix)
            }
            None => None,
        };
        let category = raw.stack_table.cell(data, "category").as_u64().unwrap_or(0) as u32;
        let subcategory = raw.stack_table.cell(data, "subcategory").as_u64().unwrap_or(0) as u32;
        stack_table.push(frame, prefix, category, subcategory);
    }

    let mut samples = SamplesTable::default();
    for (row, data) in raw.samples.data.iter().enumerate() {
        let stack = match raw.samples.cell(data, "stack").as_u64() {
            Some(stack) => {
                let stack = stack as usize;
                if stack >= stack_table.length {
                    return Err(dangling("samples", row, "stack", stack));
                }
                Some(stack)
            }
            None => None,
        };
        let time = raw.samples.cell(data, "time").as_f64().unwrap_or(0.0);
        let weight = raw.samples.cell(data, "weight").as_f64().unwrap_or(1.0);
        samples.push(stack, time, weight);
    }

    let mut markers = MarkerTable::default();
    for (row, data) in raw.markers.data.iter().enumerate() {
        let raw_name = raw
            .markers
            .cell(data, "name")
            .as_u64()
            .ok_or_else(|| dangling("markers", row, "name", usize::MAX))?
            as usize;
        let name = thread_string(raw_name)
            .ok_or_else(|| dangling("markers", row, "name", raw_name))?;
        let start_time = raw.markers.cell(data, "startTime").as_f64().unwrap_or(0.0);
        let end_time = raw.markers.cell(data, "endTime").as_f64();
        let stack = match raw.markers.cell(data, "stack").as_u64() {
            Some(stack) => {
                let stack = stack as usize;
                if stack >= stack_table.length {
                    return Err(dangling("markers", row, "stack", stack));
                }
                Some(stack)
            }
            None => None,
        };
        markers.push(name, start_time, end_time, stack);
    }

    debug!(
        "thread {thread_index} ({}): {} funcs, {} frames, {} stacks, {} samples",
        raw.name, func_table.length, frame_table.length, stack_table.length, samples.length
    );
    Ok(Thread {
        is_main_thread: raw.is_main_thread.unwrap_or(raw.tid == raw.pid),
        name: raw.name,
        tid: raw.tid,
        pid: raw.pid,
        func_table,
        frame_table,
        stack_table,
        resource_table,
        samples,
        markers,
    })
}

fn build_counter(raw: RawCounter) -> Result<Counter, PipelineError> {
    let mut samples = CounterSamplesTable::default();
    for data in &raw.samples.data {
        let time = raw.samples.cell(data, "time").as_f64().unwrap_or(0.0);
        let count = raw.samples.cell(data, "count").as_f64().unwrap_or(0.0);
        samples.push(time, count);
    }
    Ok(Counter {
        name: raw.name,
        category: raw.category,
        description: raw.description,
        pid: raw.pid,
        relative: raw.relative,
        samples,
    })
}

/// What a raw frame location string tells us about its function.
#[derive(Debug, Default, PartialEq)]
struct ParsedLocation<'a> {
    /// `None` means the whole location string is the name.
    name: Option<&'a str>,
    file: Option<&'a str>,
    line: Option<u32>,
    address: Option<u64>,
    is_js: bool,
}

/// Parse a frame location string.
///
/// Three shapes occur in raw captures:
/// * `"0x1f3a"` - an unsymbolicated native code address
/// * `"onClick (app.js:17)"` - a script function with a source location
/// * `"nsLayoutUtils::PaintFrame"` - a plain symbol name
fn parse_location(location: &str) -> ParsedLocation<'_> {
    if let Some(hex) = location.strip_prefix("0x") {
        if let Ok(address) = u64::from_str_radix(hex, 16) {
            return ParsedLocation {
                address: Some(address),
                ..ParsedLocation::default()
            };
        }
    }
    if let Some(open) = location.rfind(" (") {
        if let Some(inner) = location[open + 2..].strip_suffix(')') {
            if let Some((file, line)) = inner.rsplit_once(':') {
                if let Ok(line) = line.parse::<u32>() {
                    return ParsedLocation {
                        name: Some(&location[..open]),
                        file: Some(file),
                        line: Some(line),
                        is_js: true,
                        ..ParsedLocation::default()
                    };
                }
            }
        }
    }
    ParsedLocation::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_doc() -> Value {
        json!({
            "meta": {"version": 8, "interval": 1.0, "startTime": 10.0, "product": "demo", "markerSchema": []},
            "libs": [
                {"name": "app", "path": "/bin/app", "debugName": "app", "breakpadID": "AAA1"},
                {"name": "app", "path": "/bin/app", "debugName": "app", "breakpadID": "AAA1"},
            ],
            "threads": [{
                "name": "Main", "tid": 1, "pid": 1,
                "stringTable": ["0x100", "0x200", "onClick (app.js:17)", "GC"],
                "frameTable": {
                    "schema": {"location": 0, "lib": 1, "line": 2},
                    "data": [[0, 0, null], [1, 1, null], [2, null, null]],
                },
                "stackTable": {
                    "schema": {"prefix": 0, "frame": 1, "category": 2, "subcategory": 3},
                    "data": [[null, 0, 1, 0], [0, 1, 1, 0], [1, 2, 2, 0]],
                },
                "samples": {
                    "schema": {"stack": 0, "time": 1, "weight": 2},
                    "data": [[2, 0.0, 1.0], [2, 1.0, 1.0], [null, 2.0, 1.0]],
                },
                "markers": {
                    "schema": {"name": 0, "startTime": 1, "endTime": 2, "stack": 3},
                    "data": [[3, 0.5, 0.75, 0]],
                },
            }],
            "counters": [{
                "name": "malloc", "category": "Memory", "pid": 1, "relative": true,
                "samples": {"schema": {"time": 0, "count": 1}, "data": [[0.0, 0.0], [1.0, 5.0]]},
            }],
        })
    }

    #[test]
    fn test_build_capture_end_to_end() {
        let capture = build_capture(raw_doc()).unwrap();
        assert_eq!(capture.meta.preprocessed_version, ANALYSIS_VERSION);
        assert_eq!(capture.meta.start_time, 10.0);
        assert!(capture.meta.generated_at.is_some());

        // The duplicate library entry collapsed.
        assert_eq!(capture.libs.len(), 1);

        let thread = &capture.threads[0];
        assert_eq!(thread.frame_table.length, 3);
        assert_eq!(thread.stack_table.length, 3);
        assert_eq!(thread.samples.length, 3);
        assert_eq!(thread.markers.length, 1);
        assert!(thread.is_main_thread);

        // Both native frames map to the same (deduplicated) library resource.
        assert_eq!(thread.resource_table.length, 1);
        assert_eq!(thread.resource_table.lib[0], Some(0));
        assert_eq!(thread.func_table.resource[0], Some(0));
        assert_eq!(thread.func_table.resource[1], Some(0));
    }

    #[test]
    fn test_native_frames_keep_addresses() {
        let capture = build_capture(raw_doc()).unwrap();
        let thread = &capture.threads[0];
        assert_eq!(thread.frame_table.address[0], Some(0x100));
        assert_eq!(thread.frame_table.address[1], Some(0x200));
        // Distinct addresses stay distinct funcs until symbolication.
        assert_ne!(thread.frame_table.func[0], thread.frame_table.func[1]);
    }

    #[test]
    fn test_script_frames_get_file_and_line() {
        let capture = build_capture(raw_doc()).unwrap();
        let thread = &capture.threads[0];
        let strings = &capture.shared.string_array;
        let func = thread.frame_table.func[2];
        assert_eq!(strings.get(thread.func_table.name[func]), Some("onClick"));
        assert_eq!(
            thread.func_table.file[func].and_then(|f| strings.get(f)),
            Some("app.js")
        );
        assert_eq!(thread.func_table.line[func], Some(17));
        assert!(thread.func_table.is_js[func]);
    }

    #[test]
    fn test_dangling_stack_prefix_aborts_build() {
        let mut doc = raw_doc();
        doc["threads"][0]["stackTable"]["data"][1][0] = json!(99);
        let err = build_capture(doc).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Table(TableError::DanglingReference { value: 99, .. })
        ));
    }

    #[test]
    fn test_counters_are_carried_over() {
        let capture = build_capture(raw_doc()).unwrap();
        assert_eq!(capture.counters.len(), 1);
        let counter = &capture.counters[0];
        assert!(counter.relative);
        assert_eq!(counter.samples.count, vec![0.0, 5.0]);
    }

    #[test]
    fn test_parse_location_shapes() {
        assert_eq!(parse_location("0x1f3a").address, Some(0x1f3a));
        let js = parse_location("onClick (app.js:17)");
        assert_eq!(js.name, Some("onClick"));
        assert_eq!(js.file, Some("app.js"));
        assert_eq!(js.line, Some(17));
        assert!(js.is_js);
        let plain = parse_location("nsLayoutUtils::PaintFrame");
        assert_eq!(plain, ParsedLocation::default());
    }
}
