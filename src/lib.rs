//! Fractal Focus library crate
//!
//! Hierarchical task planning: a project is a tree of timed tasks, any task
//! can be split into AI-proposed subtasks, and focus mode walks the leaves one
//! at a time.

pub mod api;
pub mod cli;
pub mod context;
pub mod focus;
pub mod generate;
pub mod models;
pub mod store;
pub mod tree;

pub use api::{Client, ClientConfig, ClientError, ServerConfig};
pub use context::build_context;
pub use focus::{Advance, FocusError, FocusNavigator, FocusState, Reconcile};
pub use generate::{GenerateError, SubtaskGenerator};
pub use models::{Core, CoreError, FlatRow, ProposedSubtask, SessionView};
pub use store::{MemoryStore, StoreError, TaskStore};
pub use tree::{
    apply_subtasks, build_tree, collect_leaves, find_parent_of, find_with_parent, remove_node,
    sum_estimate, toggle_expansion, Task,
};
