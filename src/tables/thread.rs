//! Columnar per-thread tables.
//!
//! Every table is a set of same-length parallel arrays indexed by a shared
//! integer row index; the row index is the entity's identity. Tables never
//! store nested objects, only indices into sibling tables or into the
//! capture-level string table. "None" cells serialize as JSON `null`.

use serde::{Deserialize, Serialize};

use crate::string_table::StringIndex;

pub type FuncIndex = usize;
pub type FrameIndex = usize;
pub type StackIndex = usize;
pub type ResourceIndex = usize;
pub type LibIndex = usize;
pub type CategoryIndex = u32;

/// One thread of a capture, with all of its normalized tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub name: String,
    pub tid: u32,
    pub pid: u32,
    #[serde(default)]
    pub is_main_thread: bool,
    pub func_table: FuncTable,
    pub frame_table: FrameTable,
    pub stack_table: StackTable,
    pub resource_table: ResourceTable,
    pub samples: SamplesTable,
    pub markers: MarkerTable,
}

/// Row = a function, deduplicated by (name, resource) at build time.
///
/// Symbolication may coalesce rows further once addresses resolve to the
/// same symbol.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuncTable {
    pub name: Vec<StringIndex>,
    pub file: Vec<Option<StringIndex>>,
    pub line: Vec<Option<u32>>,
    #[serde(rename = "isJS")]
    pub is_js: Vec<bool>,
    pub resource: Vec<Option<ResourceIndex>>,
    pub length: usize,
}

impl FuncTable {
    pub fn push(
        &mut self,
        name: StringIndex,
        file: Option<StringIndex>,
        line: Option<u32>,
        is_js: bool,
        resource: Option<ResourceIndex>,
    ) -> FuncIndex {
        self.name.push(name);
        self.file.push(file);
        self.line.push(line);
        self.is_js.push(is_js);
        self.resource.push(resource);
        self.length += 1;
        self.length - 1
    }
}

/// Row = one concrete occurrence of a function at an address/line.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTable {
    pub func: Vec<FuncIndex>,
    pub address: Vec<Option<u64>>,
    pub line: Vec<Option<u32>>,
    pub length: usize,
}

impl FrameTable {
    pub fn push(&mut self, func: FuncIndex, address: Option<u64>, line: Option<u32>) -> FrameIndex {
        self.func.push(func);
        self.address.push(address);
        self.line.push(line);
        self.length += 1;
        self.length - 1
    }
}

/// Row = a node in the prefix tree of frame chains.
///
/// `prefix` is the parent stack (or `None` for a root). The table is in
/// first-observation order, not depth-first order; depth-first ordering is
/// the call-node table's job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTable {
    pub frame: Vec<FrameIndex>,
    pub prefix: Vec<Option<StackIndex>>,
    pub category: Vec<CategoryIndex>,
    pub subcategory: Vec<CategoryIndex>,
    pub length: usize,
}

impl StackTable {
    pub fn push(
        &mut self,
        frame: FrameIndex,
        prefix: Option<StackIndex>,
        category: CategoryIndex,
        subcategory: CategoryIndex,
    ) -> StackIndex {
        self.frame.push(frame);
        self.prefix.push(prefix);
        self.category.push(category);
        self.subcategory.push(subcategory);
        self.length += 1;
        self.length - 1
    }
}

/// Row = a resource a function belongs to (a library or a script origin).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTable {
    pub name: Vec<StringIndex>,
    pub lib: Vec<Option<LibIndex>>,
    pub length: usize,
}

impl ResourceTable {
    pub fn push(&mut self, name: StringIndex, lib: Option<LibIndex>) -> ResourceIndex {
        self.name.push(name);
        self.lib.push(lib);
        self.length += 1;
        self.length - 1
    }
}

/// Row = one sampled observation of the thread's stack.
///
/// `stack` is `None` for samples taken while no stack was available.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplesTable {
    pub stack: Vec<Option<StackIndex>>,
    pub time: Vec<f64>,
    pub weight: Vec<f64>,
    pub length: usize,
}

impl SamplesTable {
    pub fn push(&mut self, stack: Option<StackIndex>, time: f64, weight: f64) -> usize {
        self.stack.push(stack);
        self.time.push(time);
        self.weight.push(weight);
        self.length += 1;
        self.length - 1
    }
}

/// Row = one marker (instant or interval). Interval markers carry an end
/// time; instant markers leave it `None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerTable {
    pub name: Vec<StringIndex>,
    pub start_time: Vec<f64>,
    pub end_time: Vec<Option<f64>>,
    pub stack: Vec<Option<StackIndex>>,
    pub length: usize,
}

impl MarkerTable {
    pub fn push(
        &mut self,
        name: StringIndex,
        start_time: f64,
        end_time: Option<f64>,
        stack: Option<StackIndex>,
    ) -> usize {
        self.name.push(name);
        self.start_time.push(start_time);
        self.end_time.push(end_time);
        self.stack.push(stack);
        self.length += 1;
        self.length - 1
    }
}

impl Thread {
    /// The set of stack-table rows referenced as "self" stacks by samples or
    /// markers, as a membership bitmap over stack indices.
    ///
    /// Stacks that only appear as prefixes of other stacks are not included.
    pub fn self_stacks(&self) -> Vec<bool> {
        let mut referenced = vec![false; self.stack_table.length];
        for stack in self.samples.stack.iter().flatten() {
            if let Some(slot) = referenced.get_mut(*stack) {
                *slot = true;
            }
        }
        for stack in self.markers.stack.iter().flatten() {
            if let Some(slot) = referenced.get_mut(*stack) {
                *slot = true;
            }
        }
        referenced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_thread() -> Thread {
        Thread {
            name: "test".to_string(),
            tid: 1,
            pid: 1,
            is_main_thread: true,
            func_table: FuncTable::default(),
            frame_table: FrameTable::default(),
            stack_table: StackTable::default(),
            resource_table: ResourceTable::default(),
            samples: SamplesTable::default(),
            markers: MarkerTable::default(),
        }
    }

    #[test]
    fn test_push_returns_row_index() {
        let mut funcs = FuncTable::default();
        assert_eq!(funcs.push(0, None, None, false, None), 0);
        assert_eq!(funcs.push(1, None, None, false, None), 1);
        assert_eq!(funcs.length, 2);
    }

    #[test]
    fn test_self_stacks_from_samples_and_markers() {
        let mut thread = empty_thread();
        let frame = thread.frame_table.push(0, None, None);
        let root = thread.stack_table.push(frame, None, 0, 0);
        let child = thread.stack_table.push(frame, Some(root), 0, 0);
        let unused = thread.stack_table.push(frame, Some(root), 0, 0);

        thread.samples.push(Some(child), 1.0, 1.0);
        thread.samples.push(None, 2.0, 1.0);
        thread.markers.push(0, 3.0, None, Some(root));

        let self_stacks = thread.self_stacks();
        assert!(self_stacks[root]);
        assert!(self_stacks[child]);
        assert!(!self_stacks[unused]);
    }

    #[test]
    fn test_func_table_uses_wire_column_names() {
        let mut funcs = FuncTable::default();
        funcs.push(0, None, Some(3), true, None);
        let json = serde_json::to_value(&funcs).unwrap();
        // Column names as written by every recorder, "isJS" included.
        for key in ["name", "file", "line", "isJS", "resource", "length"] {
            assert!(json.get(key).is_some(), "missing column {key}");
        }
        assert_eq!(json["isJS"][0], true);

        let back: FuncTable = serde_json::from_value(json).unwrap();
        assert_eq!(back, funcs);
    }

    #[test]
    fn test_columnar_serialization_uses_null_for_none() {
        let mut frames = FrameTable::default();
        frames.push(0, Some(0x10), None);
        let json = serde_json::to_value(&frames).unwrap();
        assert_eq!(json["address"][0], 16);
        assert_eq!(json["line"][0], serde_json::Value::Null);
    }
}
