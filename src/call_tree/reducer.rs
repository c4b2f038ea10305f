//! Collapses a stack table into the deduplicated call-node tree.
//!
//! Two stacks with the same function sequence from the root map to the same
//! call-node path, even when address-level frames differ. Only stacks that
//! are referenced as self stacks (or are ancestors of one) are materialized.

use log::debug;

use super::{collect_prefix_chain, CallNodeInfo, ProvisionalTree};
use crate::tables::thread::{FrameTable, StackTable};
use crate::utils::error::TableError;

/// Build the call-node table and the stack → call-node map for one thread.
///
/// `self_stacks` is the membership bitmap from
/// [`crate::tables::Thread::self_stacks`].
///
/// # Errors
/// * `TableError::CorruptStackTable` - a prefix chain revisits itself
/// * `TableError::DanglingReference` - a prefix or frame index is out of range
pub fn compute_call_node_info(
    stack_table: &StackTable,
    frame_table: &FrameTable,
    self_stacks: &[bool],
    thread_index: usize,
) -> Result<CallNodeInfo, TableError> {
    let mut tree = ProvisionalTree::new();
    let mut stack_assignment: Vec<Option<usize>> = vec![None; stack_table.length];

    for stack in (0..stack_table.length).filter(|&s| self_stacks.get(s) == Some(&true)) {
        let chain = collect_prefix_chain(stack_table, stack, thread_index)?;

        // Walk the chain root-first. Prefixes already inserted for an
        // earlier chain are reused via the memoized assignment.
        let mut parent = None;
        for &s in chain.iter().rev() {
            if let Some(node) = stack_assignment[s] {
                parent = Some(node);
                continue;
            }
            let func = func_for_stack(stack_table, frame_table, s, thread_index)?;
            let node = tree.child_for(parent, func);
            stack_assignment[s] = Some(node);
            parent = Some(node);
        }
    }

    let info = tree.finalize(stack_assignment);
    debug!(
        "thread {}: reduced {} stacks to {} call nodes",
        thread_index, stack_table.length, info.table.length
    );
    Ok(info)
}

/// The function a stack's own frame belongs to, with range checks.
pub(crate) fn func_for_stack(
    stack_table: &StackTable,
    frame_table: &FrameTable,
    stack: usize,
    thread_index: usize,
) -> Result<usize, TableError> {
    let frame = stack_table.frame[stack];
    if frame >= frame_table.length {
        return Err(TableError::DanglingReference {
            thread: thread_index,
            table: "stackTable",
            row: stack,
            column: "frame",
            value: frame,
        });
    }
    Ok(frame_table.func[frame])
}
