//! Flat storage rows to task tree
//!
//! Storage hands back one row per task with an optional parent reference. The
//! builder turns those rows into a rooted tree under a synthetic `root` node.
//! Rows are never dropped: a missing or dangling parent makes the row a
//! top-level task, and a parent cycle is broken by promoting one of its members.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Task, ROOT_DEPTH};
use crate::models::FlatRow;

/// Builds a tree from flat rows.
///
/// Child order follows row order; nothing is sorted. Every task node starts
/// expanded, and depths are assigned so the root's direct children sit at 0.
pub fn build_tree(rows: &[FlatRow], root_title: &str) -> Task {
    // Row index per id, first occurrence wins
    let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(rows.len());
    let mut kept: Vec<usize> = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        if index_of.contains_key(row.id.as_str()) {
            tracing::warn!(id = %row.id, "duplicate task row ignored");
            continue;
        }
        index_of.insert(row.id.as_str(), i);
        kept.push(i);
    }

    let mut parent: Vec<Option<usize>> = vec![None; rows.len()];
    for &i in &kept {
        parent[i] = rows[i]
            .parent_id
            .as_deref()
            .and_then(|pid| index_of.get(pid).copied())
            .filter(|&p| p != i);
    }
    break_cycles(rows, &kept, &mut parent);

    // Children per node in row order; `None` is the synthetic root
    let mut root_children: Vec<usize> = Vec::new();
    let mut children_of: Vec<Vec<usize>> = vec![Vec::new(); rows.len()];
    for &i in &kept {
        match parent[i] {
            Some(p) => children_of[p].push(i),
            None => root_children.push(i),
        }
    }

    // Pre-order walk with an explicit stack to assign depths and fix an order
    // in which every child comes after its parent
    let mut order: Vec<usize> = Vec::with_capacity(kept.len());
    let mut depth: Vec<i32> = vec![0; rows.len()];
    let mut stack: Vec<(usize, i32)> = root_children
        .iter()
        .rev()
        .map(|&i| (i, ROOT_DEPTH + 1))
        .collect();
    while let Some((i, d)) = stack.pop() {
        depth[i] = d;
        order.push(i);
        for &c in children_of[i].iter().rev() {
            stack.push((c, d + 1));
        }
    }

    // Assemble bottom-up: reverse pre-order sees children before parents
    let mut built: Vec<Option<Arc<Task>>> = vec![None; rows.len()];
    for &i in order.iter().rev() {
        let row = &rows[i];
        let mut task = Task::new(row.id.clone(), row.title.clone(), row.estimate);
        task.set_depth(depth[i]);
        task.set_expanded(true);
        task.set_children(
            children_of[i]
                .iter()
                .filter_map(|&c| built[c].take())
                .collect(),
        );
        built[i] = Some(Arc::new(task));
    }

    let mut root = Task::root(root_title);
    root.set_children(
        root_children
            .iter()
            .filter_map(|&i| built[i].take())
            .collect(),
    );
    root
}

/// Detaches one member of every parent cycle so each row reaches the root.
///
/// The member with the lowest row index is promoted, which keeps the outcome a
/// function of row order alone.
fn break_cycles(rows: &[FlatRow], kept: &[usize], parent: &mut [Option<usize>]) {
    // 0 = unvisited, 1 = on the current walk, 2 = known to reach the root
    let mut state = vec![0u8; rows.len()];
    for &start in kept {
        if state[start] == 2 {
            continue;
        }
        let mut path: Vec<usize> = Vec::new();
        let mut cursor = Some(start);
        while let Some(i) = cursor {
            match state[i] {
                2 => break,
                1 => {
                    let from = path.iter().position(|&p| p == i).unwrap_or(0);
                    if let Some(&victim) = path[from..].iter().min() {
                        tracing::warn!(id = %rows[victim].id, "parent cycle broken, task moved to top level");
                        parent[victim] = None;
                    }
                    break;
                }
                _ => {
                    state[i] = 1;
                    path.push(i);
                    cursor = parent[i];
                }
            }
        }
        for i in path {
            state[i] = 2;
        }
    }
}
