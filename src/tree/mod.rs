//! Task tree engine
//!
//! A project is a rooted tree of [`Task`] nodes. The tree is rebuilt from flat
//! storage rows by [`build`], read by [`query`], and transformed by [`mutate`].
//! Mutations never edit a tree in place: they return a new root that shares
//! every untouched subtree with the input through `Arc`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod build;
pub mod mutate;
pub mod query;

pub use build::build_tree;
pub use mutate::{append_subtasks, apply_subtasks, remove_node, toggle_expansion};
pub use query::{
    collect_leaves, find, find_parent_of, find_with_parent, is_over_budget, path_to, pre_order,
    sum_estimate, Found,
};

/// Id of the synthetic node that holds a project's top-level tasks
pub const ROOT_ID: &str = "root";

/// Depth assigned to the synthetic root so that top-level tasks sit at depth 0
pub const ROOT_DEPTH: i32 = -1;

/// A node in the task tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    id: String,
    title: String,
    /// Declared budget in minutes; for a parent this is compared against, not
    /// derived from, the children
    estimate: u32,
    depth: i32,
    #[serde(default)]
    children: Vec<Arc<Task>>,
    #[serde(default)]
    is_expanded: bool,
}

impl Task {
    /// Creates a leaf task at depth 0, collapsed
    pub fn new(id: impl Into<String>, title: impl Into<String>, estimate: u32) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            estimate,
            depth: 0,
            children: Vec::new(),
            is_expanded: false,
        }
    }

    /// Creates the synthetic project root
    pub fn root(title: impl Into<String>) -> Self {
        Self {
            id: ROOT_ID.to_string(),
            title: title.into(),
            estimate: 0,
            depth: ROOT_DEPTH,
            children: Vec::new(),
            is_expanded: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn estimate(&self) -> u32 {
        self.estimate
    }

    /// Distance from the root, where the root itself is [`ROOT_DEPTH`]
    pub fn depth(&self) -> i32 {
        self.depth
    }

    pub fn children(&self) -> &[Arc<Task>] {
        &self.children
    }

    pub fn is_expanded(&self) -> bool {
        self.is_expanded
    }

    /// True when the node has no children
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_ID
    }

    pub(crate) fn set_depth(&mut self, depth: i32) {
        self.depth = depth;
    }

    pub(crate) fn set_expanded(&mut self, expanded: bool) {
        self.is_expanded = expanded;
    }

    pub(crate) fn set_children(&mut self, children: Vec<Arc<Task>>) {
        self.children = children;
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<Arc<Task>> {
        &mut self.children
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_accessors() {
        let task = Task::new("a", "Write tests", 15);

        assert_eq!(task.id(), "a");
        assert_eq!(task.title(), "Write tests");
        assert_eq!(task.estimate(), 15);
        assert_eq!(task.depth(), 0);
        assert!(task.is_leaf());
        assert!(!task.is_expanded());
        assert!(!task.is_root());
    }

    #[test]
    fn test_root_depth() {
        let root = Task::root("Album");
        assert!(root.is_root());
        assert_eq!(root.depth(), ROOT_DEPTH);
        assert_eq!(root.estimate(), 0);
    }

    #[test]
    fn test_serde_uses_camel_case_and_defaults() {
        let task: Task =
            serde_json::from_str(r#"{"id":"x","title":"T","estimate":5,"depth":0}"#).unwrap();
        assert!(task.is_leaf());
        assert!(!task.is_expanded());

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["isExpanded"], serde_json::json!(false));
    }
}
