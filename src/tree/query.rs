//! Read-only traversals over a task tree
//!
//! All walks use an explicit stack, visit children left to right, and never
//! touch expansion flags: a collapsed node is traversed like any other.

use super::Task;

/// A node located by id, along with its immediate parent
#[derive(Debug, Clone, Copy)]
pub struct Found<'a> {
    pub node: &'a Task,
    /// `None` only when the node is the root itself
    pub parent: Option<&'a Task>,
}

/// Pre-order depth-first search for `id`
pub fn find_with_parent<'a>(tree: &'a Task, id: &str) -> Option<Found<'a>> {
    let mut stack: Vec<(&Task, Option<&Task>)> = vec![(tree, None)];
    while let Some((node, parent)) = stack.pop() {
        if node.id() == id {
            return Some(Found { node, parent });
        }
        for child in node.children().iter().rev() {
            stack.push((child.as_ref(), Some(node)));
        }
    }
    None
}

pub fn find<'a>(tree: &'a Task, id: &str) -> Option<&'a Task> {
    find_with_parent(tree, id).map(|found| found.node)
}

/// Parent of `id`; `None` for the root and for unknown ids
pub fn find_parent_of<'a>(tree: &'a Task, id: &str) -> Option<&'a Task> {
    find_with_parent(tree, id).and_then(|found| found.parent)
}

/// Child positions leading from the root to `id`; empty for the root itself
pub fn path_to(tree: &Task, id: &str) -> Option<Vec<usize>> {
    let mut stack: Vec<(&Task, Vec<usize>)> = vec![(tree, Vec::new())];
    while let Some((node, path)) = stack.pop() {
        if node.id() == id {
            return Some(path);
        }
        for (i, child) in node.children().iter().enumerate().rev() {
            let mut child_path = path.clone();
            child_path.push(i);
            stack.push((child.as_ref(), child_path));
        }
    }
    None
}

/// Every node in pre-order, the root first
pub fn pre_order(tree: &Task) -> Vec<&Task> {
    let mut out = Vec::new();
    let mut stack = vec![tree];
    while let Some(node) = stack.pop() {
        out.push(node);
        stack.extend(node.children().iter().rev().map(|c| c.as_ref()));
    }
    out
}

/// Leaves in pre-order.
///
/// This sequence is what focus mode walks through, so it depends only on the
/// shape of the tree. A tree with no tasks yields the root alone.
pub fn collect_leaves(tree: &Task) -> Vec<&Task> {
    pre_order(tree)
        .into_iter()
        .filter(|node| node.is_leaf())
        .collect()
}

/// Sum of leaf estimates below `node`, or the node's own estimate for a leaf.
///
/// A parent's declared estimate is ignored here; compare the two with
/// [`is_over_budget`].
pub fn sum_estimate(node: &Task) -> u64 {
    collect_leaves(node)
        .into_iter()
        .map(|leaf| u64::from(leaf.estimate()))
        .sum()
}

/// True when a parent's leaves add up to more than its declared estimate
pub fn is_over_budget(node: &Task) -> bool {
    !node.is_leaf() && sum_estimate(node) > u64::from(node.estimate())
}
