//! Deduplicated call-node trees derived from stack tables.
//!
//! A call node represents a unique function path from a root; many stacks
//! (and samples) may map onto one call node. Unlike the stack table, the
//! call-node table is in depth-first pre-order, which gives O(1) ancestor,
//! descendant, and subtree-range queries.

pub mod inverted;
pub mod reducer;

pub use inverted::compute_inverted_call_node_info;
pub use reducer::compute_call_node_info;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::tables::thread::{FuncIndex, StackIndex};
use crate::tables::Capture;
use crate::utils::error::TableError;

/// Index of a node in a [`CallNodeTable`]
pub type CallNodeIndex = usize;

/// Columnar call-node tree in depth-first pre-order.
///
/// Invariant: for a node at index `i` with M descendants, the half-open range
/// `[i, i + 1 + M)` contains exactly that node and its descendants. Root
/// nodes have `prefix == None`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallNodeTable {
    pub func: Vec<FuncIndex>,
    pub prefix: Vec<Option<CallNodeIndex>>,
    pub depth: Vec<u32>,
    /// One past the last descendant of each node. Monotonically
    /// non-decreasing across indices.
    pub subtree_end: Vec<usize>,
    pub length: usize,
}

impl CallNodeTable {
    /// The half-open index range covering `node` and all of its descendants.
    pub fn subtree_range(&self, node: CallNodeIndex) -> std::ops::Range<usize> {
        node..self.subtree_end[node]
    }

    /// O(1) ancestor-or-self test by range containment.
    pub fn is_ancestor_of(&self, ancestor: CallNodeIndex, descendant: CallNodeIndex) -> bool {
        ancestor <= descendant && descendant < self.subtree_end[ancestor]
    }
}

/// A call-node table together with its stack-index mapping.
///
/// `stack_to_node[s]` is `None` for stacks that are never used as a self
/// stack and are not an ancestor of one; such stacks are not materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallNodeInfo {
    pub table: CallNodeTable,
    pub stack_to_node: Vec<Option<CallNodeIndex>>,
}

impl CallNodeInfo {
    /// The root-to-leaf (or leaf-to-root, for inverted trees) function path
    /// of a call node.
    pub fn func_path(&self, node: CallNodeIndex) -> Vec<FuncIndex> {
        let mut path = Vec::new();
        let mut current = Some(node);
        while let Some(n) = current {
            path.push(self.table.func[n]);
            current = self.table.prefix[n];
        }
        path.reverse();
        path
    }
}

/// Lazily built, generation-keyed cache of call-node trees.
///
/// Derived trees stay valid to read across a symbolication merge; the merge
/// bumps the capture generation, and the next `sync_generation` call drops
/// stale entries exactly once so they are rebuilt from the remapped tables.
#[derive(Debug, Default)]
pub struct CallTreeCache {
    generation: u64,
    entries: HashMap<(usize, bool), CallNodeInfo>,
}

impl CallTreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Drop cached trees if `generation` is newer than the one they were
    /// built against. Calling this repeatedly with the same generation is a
    /// no-op, so each merge batch invalidates at most once.
    pub fn sync_generation(&mut self, generation: u64) {
        if generation > self.generation {
            self.entries.clear();
            self.generation = generation;
        }
    }

    /// Get the (possibly cached) call-node tree for one thread.
    ///
    /// Failures are per-thread: a corrupt stack table in one thread does not
    /// poison trees cached for other threads.
    pub fn get_or_build(
        &mut self,
        capture: &Capture,
        thread_index: usize,
        inverted: bool,
    ) -> Result<&CallNodeInfo, TableError> {
        let key = (thread_index, inverted);
        if !self.entries.contains_key(&key) {
            let thread = &capture.threads[thread_index];
            let self_stacks = thread.self_stacks();
            let info = if inverted {
                compute_inverted_call_node_info(
                    &thread.stack_table,
                    &thread.frame_table,
                    &self_stacks,
                    thread_index,
                )?
            } else {
                compute_call_node_info(
                    &thread.stack_table,
                    &thread.frame_table,
                    &self_stacks,
                    thread_index,
                )?
            };
            self.entries.insert(key, info);
        }
        Ok(&self.entries[&key])
    }
}

/// Scratch tree used while inserting stack chains, before depth-first order
/// is known. Nodes are discovered in first-use order; `finalize` reassigns
/// indices in pre-order and computes subtree ends.
#[derive(Debug, Default)]
pub(crate) struct ProvisionalTree {
    func: Vec<FuncIndex>,
    parent: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    roots: Vec<usize>,
    child_lookup: HashMap<(Option<usize>, FuncIndex), usize>,
}

impl ProvisionalTree {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Find or create the child of `parent` for `func`. Two chains with the
    /// same function sequence share nodes through this lookup.
    pub(crate) fn child_for(&mut self, parent: Option<usize>, func: FuncIndex) -> usize {
        if let Some(&existing) = self.child_lookup.get(&(parent, func)) {
            return existing;
        }
        let node = self.func.len();
        self.func.push(func);
        self.parent.push(parent);
        self.children.push(Vec::new());
        match parent {
            Some(p) => self.children[p].push(node),
            None => self.roots.push(node),
        }
        self.child_lookup.insert((parent, func), node);
        node
    }

    /// Assign depth-first pre-order indices and subtree ends, and remap the
    /// per-stack node assignment accordingly.
    ///
    /// Sibling order is first-insertion order; it is stable within one build
    /// but otherwise unspecified, and consumers must not rely on it.
    pub(crate) fn finalize(self, stack_assignment: Vec<Option<usize>>) -> CallNodeInfo {
        let node_count = self.func.len();
        let mut new_index = vec![usize::MAX; node_count];
        let mut preorder = Vec::with_capacity(node_count);

        let mut work: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(node) = work.pop() {
            new_index[node] = preorder.len();
            preorder.push(node);
            for &child in self.children[node].iter().rev() {
                work.push(child);
            }
        }

        // Subtree sizes fall out of a reverse pre-order sweep: every child
        // appears after its parent, so its size is already known.
        let mut subtree_size = vec![1usize; node_count];
        for &node in preorder.iter().rev() {
            for &child in &self.children[node] {
                subtree_size[node] += subtree_size[child];
            }
        }

        let mut table = CallNodeTable {
            func: vec![0; node_count],
            prefix: vec![None; node_count],
            depth: vec![0; node_count],
            subtree_end: vec![0; node_count],
            length: node_count,
        };
        for &node in &preorder {
            let i = new_index[node];
            table.func[i] = self.func[node];
            table.prefix[i] = self.parent[node].map(|p| new_index[p]);
            table.depth[i] = match table.prefix[i] {
                Some(p) => table.depth[p] + 1,
                None => 0,
            };
            table.subtree_end[i] = i + subtree_size[node];
        }

        let stack_to_node = stack_assignment
            .into_iter()
            .map(|assigned| assigned.map(|node| new_index[node]))
            .collect();

        CallNodeInfo { table, stack_to_node }
    }
}

/// Walk one prefix chain from `stack` to its root, yielding stack indices
/// leaf-first. Detects cycles via a depth bound: a well-formed chain can
/// never be longer than the stack table itself.
pub(crate) fn collect_prefix_chain(
    stack_table: &crate::tables::thread::StackTable,
    stack: StackIndex,
    thread_index: usize,
) -> Result<Vec<StackIndex>, TableError> {
    let mut chain = Vec::new();
    let mut current = Some(stack);
    while let Some(s) = current {
        if s >= stack_table.length {
            return Err(TableError::DanglingReference {
                thread: thread_index,
                table: "stackTable",
                row: chain.last().copied().unwrap_or(stack),
                column: "prefix",
                value: s,
            });
        }
        chain.push(s);
        if chain.len() > stack_table.length {
            return Err(TableError::CorruptStackTable {
                thread: thread_index,
                stack,
            });
        }
        current = stack_table.prefix[s];
    }
    Ok(chain)
}
