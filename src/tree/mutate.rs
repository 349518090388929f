//! Non-destructive tree transformations
//!
//! Each operation returns a new root. Only the nodes on the path from the root
//! to the target are copied; every other subtree is the same `Arc` as in the
//! input, so a mutation costs the depth of the target, not the size of the
//! tree. An unknown target id leaves the result equal to the input.

use std::sync::Arc;

use super::{path_to, Task};
use crate::models::ProposedSubtask;

/// Copies the ancestors of `path` and replaces the node at its end with `f(node)`
fn rewrite_at<F>(node: &Task, path: &[usize], f: F) -> Task
where
    F: FnOnce(&Task) -> Task,
{
    let Some((&first, rest)) = path.split_first() else {
        return f(node);
    };
    let mut copy = node.clone();
    let children = copy.children_mut();
    let rewritten = rewrite_at(&children[first], rest, f);
    children[first] = Arc::new(rewritten);
    copy
}

/// Flips the expansion flag of `target_id`
pub fn toggle_expansion(tree: &Task, target_id: &str) -> Task {
    match path_to(tree, target_id) {
        Some(path) => rewrite_at(tree, &path, |node| {
            let mut toggled = node.clone();
            toggled.set_expanded(!node.is_expanded());
            toggled
        }),
        None => tree.clone(),
    }
}

/// Replaces the children of `target_id` with the selected proposals.
///
/// New children get ids `{target_id}-{proposal.id}`, sit one level below the
/// target, and start collapsed. The target is expanded so they show up.
/// Unselected proposals are discarded.
pub fn apply_subtasks(tree: &Task, target_id: &str, proposals: &[ProposedSubtask]) -> Task {
    graft(tree, target_id, proposals, false)
}

/// Like [`apply_subtasks`], but the selected proposals are added after the
/// target's existing children instead of replacing them. This is the shape
/// storage ends up in when proposals are saved under a task.
pub fn append_subtasks(tree: &Task, target_id: &str, proposals: &[ProposedSubtask]) -> Task {
    graft(tree, target_id, proposals, true)
}

fn graft(tree: &Task, target_id: &str, proposals: &[ProposedSubtask], keep_existing: bool) -> Task {
    let Some(path) = path_to(tree, target_id) else {
        return tree.clone();
    };
    rewrite_at(tree, &path, |node| {
        let grafted = proposals.iter().filter(|p| p.selected).map(|p| {
            let mut child = Task::new(
                format!("{}-{}", node.id(), p.id),
                p.title.clone(),
                p.estimate,
            );
            child.set_depth(node.depth() + 1);
            Arc::new(child)
        });
        let mut target = node.clone();
        let children = if keep_existing {
            node.children().iter().cloned().chain(grafted).collect()
        } else {
            grafted.collect()
        };
        target.set_children(children);
        target.set_expanded(true);
        target
    })
}

/// Removes `target_id` and its whole subtree.
///
/// The removed node's children go with it; nothing is re-parented. The root
/// has no parent to be removed from, so targeting it is a no-op.
pub fn remove_node(tree: &Task, target_id: &str) -> Task {
    let Some(path) = path_to(tree, target_id) else {
        return tree.clone();
    };
    let Some((&last, parent_path)) = path.split_last() else {
        return tree.clone();
    };
    rewrite_at(tree, parent_path, |parent| {
        let mut copy = parent.clone();
        copy.children_mut().remove(last);
        copy
    })
}
