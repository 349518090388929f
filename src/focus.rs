//! Focus mode sequencing
//!
//! Focus mode presents one leaf at a time and walks the pre-order leaf sequence
//! of the current tree. The navigator holds no tree of its own: every call
//! takes the latest tree value, so a restructure between two steps is picked
//! up on the next one.

use serde::{Deserialize, Serialize};

use crate::models::ProposedSubtask;
use crate::tree::{self, collect_leaves, find, Task};

/// Where the user is in the browse / focus cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum FocusState {
    /// Browsing the tree
    Tree,
    /// A single leaf is presented
    Focus {
        #[serde(rename = "currentId")]
        current_id: String,
    },
    /// No leaves are left after the last one worked on
    Complete,
}

/// Result of moving past the current leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Focus moved to this leaf
    Next(String),
    /// Nothing follows; the navigator is now [`FocusState::Complete`]
    Exhausted,
    /// The navigator was not focused on anything
    Idle,
}

/// What happened to the focused id when the tree under it was replaced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconcile {
    /// Still a leaf of the new tree, or nothing was focused
    Unchanged,
    /// The focused task gained subtasks; focus moved to its first leaf
    Descended(String),
    /// The focused task is gone; the navigator is back in [`FocusState::Tree`]
    Lost,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FocusError {
    #[error("Task '{0}' not found")]
    NotFound(String),

    #[error("Task '{0}' has subtasks; only leaf tasks can be focused")]
    NotALeaf(String),

    #[error("The project root cannot be focused")]
    Root,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusNavigator {
    state: FocusState,
}

impl Default for FocusNavigator {
    fn default() -> Self {
        Self::new()
    }
}

impl FocusNavigator {
    pub fn new() -> Self {
        Self {
            state: FocusState::Tree,
        }
    }

    pub fn state(&self) -> &FocusState {
        &self.state
    }

    /// Id of the leaf being worked on, if any
    pub fn current(&self) -> Option<&str> {
        match &self.state {
            FocusState::Focus { current_id } => Some(current_id),
            _ => None,
        }
    }

    /// Tree → Focus on the given leaf
    pub fn enter(&mut self, tree: &Task, id: &str) -> Result<(), FocusError> {
        let node = find(tree, id).ok_or_else(|| FocusError::NotFound(id.to_string()))?;
        if node.is_root() {
            return Err(FocusError::Root);
        }
        if !node.is_leaf() {
            return Err(FocusError::NotALeaf(id.to_string()));
        }
        self.state = FocusState::Focus {
            current_id: id.to_string(),
        };
        Ok(())
    }

    /// Any state → Tree
    pub fn exit(&mut self) {
        self.state = FocusState::Tree;
    }

    /// Leaf that follows the current one in `tree`, without moving
    pub fn peek_next<'a>(&self, tree: &'a Task) -> Option<&'a Task> {
        let current = self.current()?;
        let leaves = collect_leaves(tree);
        let index = leaves.iter().position(|leaf| leaf.id() == current)?;
        leaves.get(index + 1).copied()
    }

    /// True while another leaf follows the current one
    pub fn has_more(&self, tree: &Task) -> bool {
        self.peek_next(tree).is_some()
    }

    /// Moves to the next leaf in pre-order.
    ///
    /// A current id that is no longer in the tree has no successor, which ends
    /// the session in [`FocusState::Complete`].
    pub fn advance(&mut self, tree: &Task) -> Advance {
        if self.current().is_none() {
            return Advance::Idle;
        }
        match self.peek_next(tree).map(|leaf| leaf.id().to_string()) {
            Some(next) => self.focus_on(next),
            None => {
                self.state = FocusState::Complete;
                Advance::Exhausted
            }
        }
    }

    /// Removes the current leaf from `tree` and focuses whatever now occupies
    /// its place in the leaf sequence.
    ///
    /// Returns the pruned tree. When not focused the tree is returned as is.
    pub fn complete_current(&mut self, tree: &Task) -> (Task, Advance) {
        let Some(current) = self.current().map(str::to_string) else {
            return (tree.clone(), Advance::Idle);
        };
        let position = collect_leaves(tree)
            .iter()
            .position(|leaf| leaf.id() == current);
        let pruned = tree::remove_node(tree, &current);

        let next = position.and_then(|i| {
            collect_leaves(&pruned)
                .get(i)
                .filter(|leaf| !leaf.is_root())
                .map(|leaf| leaf.id().to_string())
        });
        let advance = match next {
            Some(id) => self.focus_on(id),
            None => {
                self.state = FocusState::Complete;
                Advance::Exhausted
            }
        };
        (pruned, advance)
    }

    /// Called after `split_id` received children. If it was the focused leaf,
    /// focus drops to its first child so the new level is worked through
    /// instead of skipped.
    pub fn descend_after_split(&mut self, tree: &Task, split_id: &str) -> bool {
        if self.current() != Some(split_id) {
            return false;
        }
        let first = find(tree, split_id)
            .and_then(|node| node.children().first())
            .map(|child| child.id().to_string());
        match first {
            Some(id) => {
                self.focus_on(id);
                true
            }
            None => false,
        }
    }

    /// Checks the focused id against a tree that replaced the one it was
    /// chosen from. Focus only ever rests on a leaf that exists.
    pub fn reconcile(&mut self, tree: &Task) -> Reconcile {
        let Some(current) = self.current() else {
            return Reconcile::Unchanged;
        };
        let node = match find(tree, current) {
            Some(node) if node.is_leaf() => return Reconcile::Unchanged,
            Some(node) => node,
            None => {
                self.exit();
                return Reconcile::Lost;
            }
        };
        match collect_leaves(node).first().map(|leaf| leaf.id().to_string()) {
            Some(id) => {
                self.focus_on(id.clone());
                Reconcile::Descended(id)
            }
            None => {
                self.exit();
                Reconcile::Lost
            }
        }
    }

    /// Grafts proposals onto the focused leaf and descends into them
    pub fn split_current(&mut self, tree: &Task, proposals: &[ProposedSubtask]) -> Task {
        let Some(current) = self.current().map(str::to_string) else {
            return tree.clone();
        };
        let split = tree::apply_subtasks(tree, &current, proposals);
        self.descend_after_split(&split, &current);
        split
    }

    fn focus_on(&mut self, id: String) -> Advance {
        self.state = FocusState::Focus {
            current_id: id.clone(),
        };
        Advance::Next(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FlatRow;
    use crate::tree::build_tree;
    use pretty_assertions::assert_eq;

    fn sample() -> Task {
        build_tree(
            &[
                FlatRow::new("a", "A", 30),
                FlatRow::child("w", "w", 5, "a"),
                FlatRow::child("t1", "t1", 5, "a"),
                FlatRow::child("t2", "t2", 10, "a"),
            ],
            "Project",
        )
    }

    #[test]
    fn test_enter_requires_leaf() {
        let tree = sample();
        let mut nav = FocusNavigator::new();

        assert_eq!(nav.enter(&tree, "a"), Err(FocusError::NotALeaf("a".into())));
        assert_eq!(nav.enter(&tree, "zz"), Err(FocusError::NotFound("zz".into())));
        assert_eq!(nav.state(), &FocusState::Tree);

        nav.enter(&tree, "w").unwrap();
        assert_eq!(nav.current(), Some("w"));
    }

    #[test]
    fn test_root_of_empty_project_cannot_be_focused() {
        let tree = build_tree(&[], "Empty");
        let mut nav = FocusNavigator::new();
        assert_eq!(nav.enter(&tree, "root"), Err(FocusError::Root));
    }

    #[test]
    fn test_walkthrough_with_completion() {
        let tree = sample();
        let mut nav = FocusNavigator::new();
        nav.enter(&tree, "w").unwrap();

        assert!(nav.has_more(&tree));
        assert_eq!(nav.advance(&tree), Advance::Next("t1".into()));

        let (tree, step) = nav.complete_current(&tree);
        assert!(find(&tree, "t1").is_none());
        assert_eq!(step, Advance::Next("t2".into()));
        assert!(!nav.has_more(&tree));

        assert_eq!(nav.advance(&tree), Advance::Exhausted);
        assert_eq!(nav.state(), &FocusState::Complete);

        nav.exit();
        assert_eq!(nav.state(), &FocusState::Tree);
        assert_eq!(nav.advance(&tree), Advance::Idle);
    }

    #[test]
    fn test_completing_last_child_surfaces_parent() {
        let tree = build_tree(
            &[
                FlatRow::new("p", "P", 10),
                FlatRow::child("only", "Only", 10, "p"),
                FlatRow::new("q", "Q", 5),
            ],
            "Project",
        );
        let mut nav = FocusNavigator::new();
        nav.enter(&tree, "only").unwrap();

        let (tree, step) = nav.complete_current(&tree);
        assert_eq!(step, Advance::Next("p".into()));
        assert!(tree.children()[0].is_leaf());
    }

    #[test]
    fn test_completing_everything_ends_in_complete() {
        let tree = build_tree(&[FlatRow::new("solo", "Solo", 5)], "Project");
        let mut nav = FocusNavigator::new();
        nav.enter(&tree, "solo").unwrap();

        let (tree, step) = nav.complete_current(&tree);
        assert_eq!(step, Advance::Exhausted);
        assert_eq!(nav.state(), &FocusState::Complete);
        assert!(tree.is_leaf());
    }

    #[test]
    fn test_advance_after_external_delete_completes() {
        let tree = sample();
        let mut nav = FocusNavigator::new();
        nav.enter(&tree, "w").unwrap();
        let tree = tree::remove_node(&tree, "w");
        assert_eq!(nav.advance(&tree), Advance::Exhausted);
    }

    #[test]
    fn test_split_descends_into_first_child() {
        let tree = sample();
        let mut nav = FocusNavigator::new();
        nav.enter(&tree, "t1").unwrap();

        let proposals = vec![
            ProposedSubtask::new("s1", "first", 2),
            ProposedSubtask::new("s2", "second", 3),
        ];
        let tree = nav.split_current(&tree, &proposals);
        assert_eq!(nav.current(), Some("t1-s1"));
        assert_eq!(nav.advance(&tree), Advance::Next("t1-s2".into()));
    }

    #[test]
    fn test_reconcile_after_tree_swap() {
        let tree = sample();
        let mut nav = FocusNavigator::new();
        nav.enter(&tree, "t1").unwrap();
        assert_eq!(nav.reconcile(&tree), Reconcile::Unchanged);

        let grown = tree::apply_subtasks(
            &tree,
            "t1",
            &[ProposedSubtask::new("s1", "first", 2), ProposedSubtask::new("s2", "second", 3)],
        );
        assert_eq!(nav.reconcile(&grown), Reconcile::Descended("t1-s1".into()));
        assert_eq!(nav.current(), Some("t1-s1"));

        let pruned = tree::remove_node(&grown, "t1");
        assert_eq!(nav.reconcile(&pruned), Reconcile::Lost);
        assert_eq!(nav.state(), &FocusState::Tree);
        assert_eq!(nav.reconcile(&pruned), Reconcile::Unchanged);
    }

    #[test]
    fn test_descend_ignores_other_nodes() {
        let tree = sample();
        let mut nav = FocusNavigator::new();
        nav.enter(&tree, "w").unwrap();
        let split = tree::apply_subtasks(&tree, "t2", &[ProposedSubtask::new("s", "s", 1)]);
        assert!(!nav.descend_after_split(&split, "t2"));
        assert_eq!(nav.current(), Some("w"));
    }
}
