//! Sibling context for AI splitting
//!
//! When a task is split, the generator is told what the parent goal is and
//! what the sibling tasks already cover so it does not propose duplicate work.

use crate::tree::{find_parent_of, Task};

/// Returned when the target has no parent to describe
pub const ROOT_LEVEL_CONTEXT: &str = "This is a root level task.";

/// How many grandchild titles are quoted per sibling
const SUBSTEP_HINTS: usize = 3;

/// Builds the context string handed to the subtask generator
pub fn build_context(tree: &Task, target_id: &str) -> String {
    let Some(parent) = find_parent_of(tree, target_id) else {
        return ROOT_LEVEL_CONTEXT.to_string();
    };

    let siblings = parent.children();
    if siblings.len() <= 1 {
        return format!("Parent Goal: \"{}\"", parent.title());
    }

    let sibling_summary = siblings
        .iter()
        .filter(|child| child.id() != target_id)
        .map(|child| {
            let substeps = child
                .children()
                .iter()
                .take(SUBSTEP_HINTS)
                .map(|c| c.title())
                .collect::<Vec<_>>()
                .join(", ");
            if substeps.is_empty() {
                format!("- Sibling Task: \"{}\"", child.title())
            } else {
                format!(
                    "- Sibling Task: \"{}\" (Includes: {}...)",
                    child.title(),
                    substeps
                )
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let target_title = siblings
        .iter()
        .find(|child| child.id() == target_id)
        .map(|child| child.title())
        .unwrap_or_default();

    format!(
        "PARENT GOAL: \"{}\"\n\nCONTEXT - SIBLING TASKS (ALREADY PLANNED):\n{}\n\nINSTRUCTION: Ensure your new subtasks for \"{}\" complement the above. Do not duplicate work already covered by siblings.",
        parent.title(),
        sibling_summary,
        target_title
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FlatRow;
    use crate::tree::build_tree;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_root_and_unknown_get_sentinel() {
        let tree = build_tree(&[FlatRow::new("a", "A", 1)], "Album");
        assert_eq!(build_context(&tree, "root"), ROOT_LEVEL_CONTEXT);
        assert_eq!(build_context(&tree, "missing"), ROOT_LEVEL_CONTEXT);
    }

    #[test]
    fn test_only_child_names_parent() {
        let tree = build_tree(
            &[FlatRow::new("a", "A", 1), FlatRow::child("b", "B", 1, "a")],
            "Album",
        );
        assert_eq!(build_context(&tree, "b"), "Parent Goal: \"A\"");
        // the project root is the parent of a lone top-level task
        assert_eq!(build_context(&tree, "a"), "Parent Goal: \"Album\"");
    }

    #[test]
    fn test_sibling_summary_truncates_hints() {
        let tree = build_tree(
            &[
                FlatRow::new("goal", "Record piano", 30),
                FlatRow::child("target", "Mix", 10, "goal"),
                FlatRow::child("s1", "Setup", 5, "goal"),
                FlatRow::child("s2", "Record", 20, "goal"),
                FlatRow::child("p1", "p1", 1, "s2"),
                FlatRow::child("p2", "p2", 1, "s2"),
                FlatRow::child("p3", "p3", 1, "s2"),
                FlatRow::child("p4", "p4", 1, "s2"),
            ],
            "Album",
        );
        let context = build_context(&tree, "target");
        let expected = "PARENT GOAL: \"Record piano\"\n\n\
CONTEXT - SIBLING TASKS (ALREADY PLANNED):\n\
- Sibling Task: \"Setup\"\n\
- Sibling Task: \"Record\" (Includes: p1, p2, p3...)\n\n\
INSTRUCTION: Ensure your new subtasks for \"Mix\" complement the above. Do not duplicate work already covered by siblings.";
        assert_eq!(context, expected);
        assert!(!context.contains("p4"));
    }
}
