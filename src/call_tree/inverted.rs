//! Inverted call-node trees for self-time aggregation.
//!
//! The call-node path of a stack A -> B -> C -> D becomes D -> C -> B -> A:
//! every inverted root is a function that appeared as a leaf, so weight can
//! be aggregated per function regardless of caller.

use log::debug;

use super::reducer::func_for_stack;
use super::{collect_prefix_chain, CallNodeInfo, ProvisionalTree};
use crate::tables::thread::{FrameTable, StackTable};
use crate::utils::error::TableError;

/// Build the inverted call-node table for one thread.
///
/// Only stacks that are themselves self stacks get an inverted path; a stack
/// used purely as a prefix of other stacks produces no inverted nodes of its
/// own, since nothing would ever query them.
pub fn compute_inverted_call_node_info(
    stack_table: &StackTable,
    frame_table: &FrameTable,
    self_stacks: &[bool],
    thread_index: usize,
) -> Result<CallNodeInfo, TableError> {
    let mut tree = ProvisionalTree::new();
    let mut stack_assignment: Vec<Option<usize>> = vec![None; stack_table.length];

    for stack in (0..stack_table.length).filter(|&s| self_stacks.get(s) == Some(&true)) {
        // The prefix walk yields the chain leaf-first, which is exactly the
        // insertion order for the inverted tree.
        let chain = collect_prefix_chain(stack_table, stack, thread_index)?;
        let mut parent = None;
        for &s in &chain {
            let func = func_for_stack(stack_table, frame_table, s, thread_index)?;
            parent = Some(tree.child_for(parent, func));
        }
        // The self stack maps to the node for its complete reversed path.
        stack_assignment[stack] = parent;
    }

    let info = tree.finalize(stack_assignment);
    debug!(
        "thread {}: inverted tree has {} call nodes",
        thread_index, info.table.length
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_tree::compute_call_node_info;

    fn tables(stacks: &[(usize, Option<usize>)], func_count: usize) -> (StackTable, FrameTable) {
        let mut frame_table = FrameTable::default();
        for func in 0..func_count {
            frame_table.push(func, None, None);
        }
        let mut stack_table = StackTable::default();
        for &(frame, prefix) in stacks {
            stack_table.push(frame, prefix, 0, 0);
        }
        (stack_table, frame_table)
    }

    #[test]
    fn test_paths_are_reversed() {
        // 0: A, 1: A -> B, 2: A -> B -> C
        let (stack_table, frame_table) = tables(&[(0, None), (1, Some(0)), (2, Some(1))], 3);
        let self_stacks = vec![false, false, true];
        let info =
            compute_inverted_call_node_info(&stack_table, &frame_table, &self_stacks, 0).unwrap();

        let leaf_node = info.stack_to_node[2].unwrap();
        // Root-to-node path in the inverted tree is leaf-to-root of the
        // original stack: C, B, A.
        assert_eq!(info.func_path(leaf_node), vec![2, 1, 0]);
        // The inverted root is C.
        assert_eq!(info.table.func[0], 2);
        assert_eq!(info.table.prefix[0], None);
    }

    #[test]
    fn test_only_self_stacks_get_inverted_nodes() {
        let (stack_table, frame_table) = tables(&[(0, None), (1, Some(0))], 2);
        let self_stacks = vec![false, true];
        let info =
            compute_inverted_call_node_info(&stack_table, &frame_table, &self_stacks, 0).unwrap();

        // Prefix-only stack 0 maps to nothing, and no inverted root exists
        // for func A as a leaf.
        assert!(info.stack_to_node[0].is_none());
        assert!(info.stack_to_node[1].is_some());
        assert_eq!(info.table.length, 2); // B (root) and A under it
    }

    #[test]
    fn test_shared_leaves_merge() {
        // Two stacks ending in the same leaf function C:
        //   A -> C  and  B -> C
        let (stack_table, frame_table) =
            tables(&[(0, None), (2, Some(0)), (1, None), (2, Some(2))], 3);
        let self_stacks = vec![false, true, false, true];
        let info =
            compute_inverted_call_node_info(&stack_table, &frame_table, &self_stacks, 0).unwrap();

        // Both inverted paths share a single root node for C.
        let n1 = info.stack_to_node[1].unwrap();
        let n3 = info.stack_to_node[3].unwrap();
        assert_eq!(info.table.prefix[n1], info.table.prefix[n3]);
        let c_root = info.table.prefix[n1].unwrap();
        assert_eq!(info.table.func[c_root], 2);
        assert_eq!(info.table.depth[c_root], 0);
    }

    #[test]
    fn test_inversion_round_trips_self_stack_paths() {
        // Inverting the inverted tree's leaf paths reconstructs the forward
        // func sequences.
        let (stack_table, frame_table) =
            tables(&[(0, None), (1, Some(0)), (2, Some(1)), (3, Some(0))], 4);
        let self_stacks = vec![false, false, true, true];

        let forward =
            compute_call_node_info(&stack_table, &frame_table, &self_stacks, 0).unwrap();
        let inverted =
            compute_inverted_call_node_info(&stack_table, &frame_table, &self_stacks, 0).unwrap();

        for stack in [2usize, 3] {
            let forward_path = forward.func_path(forward.stack_to_node[stack].unwrap());
            let mut inverted_path =
                inverted.func_path(inverted.stack_to_node[stack].unwrap());
            inverted_path.reverse();
            assert_eq!(forward_path, inverted_path);
        }
    }
}
