//! Core models for the fractal-focus library
//!
//! Storage rows, projects and categories, proposals, the completion log, and
//! the [`Core`] that owns the open project's tree and focus state.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::context::build_context;
use crate::focus::{Advance, FocusError, FocusNavigator, FocusState, Reconcile};
use crate::generate::{into_proposals, GenerateError, GeneratedSubtask, SubtaskGenerator};
use crate::store::{StoreError, TaskStore};
use crate::tree::{self, build_tree, find, find_parent_of, is_over_budget, pre_order, Task, ROOT_ID};

/// A task as storage holds it: flat, with an optional parent reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatRow {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub estimate: u32,
    #[serde(default, alias = "parent_id")]
    pub parent_id: Option<String>,
}

impl FlatRow {
    /// A row with no parent, i.e. a top-level task of its project
    pub fn new(id: impl Into<String>, title: impl Into<String>, estimate: u32) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            estimate,
            parent_id: None,
        }
    }

    pub fn child(
        id: impl Into<String>,
        title: impl Into<String>,
        estimate: u32,
        parent_id: impl Into<String>,
    ) -> Self {
        Self {
            parent_id: Some(parent_id.into()),
            ..Self::new(id, title, estimate)
        }
    }
}

/// A candidate subtask awaiting the user's selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedSubtask {
    pub id: String,
    pub title: String,
    pub estimate: u32,
    #[serde(default = "default_selected")]
    pub selected: bool,
}

fn default_selected() -> bool {
    true
}

impl ProposedSubtask {
    /// A selected proposal
    pub fn new(id: impl Into<String>, title: impl Into<String>, estimate: u32) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            estimate,
            selected: true,
        }
    }
}

/// Total of the selected proposals next to the task they would replace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalBudget {
    pub selected_total: u64,
    pub target_estimate: u32,
    pub over_budget: bool,
}

impl ProposalBudget {
    pub fn summarize(target_estimate: u32, proposals: &[ProposedSubtask]) -> Self {
        let selected_total = proposals
            .iter()
            .filter(|p| p.selected)
            .map(|p| u64::from(p.estimate))
            .sum();
        Self {
            selected_total,
            target_estimate,
            over_budget: selected_total > u64::from(target_estimate),
        }
    }
}

/// Snapshot of a task taken when it was marked done
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTask {
    pub id: String,
    pub title: String,
    pub estimate: u32,
    pub completed_at: DateTime<Utc>,
    pub project_name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProjectMode {
    #[default]
    Creative,
    Technical,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub emoji: String,
    pub mode: ProjectMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub mode: Option<ProjectMode>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
}

impl NewProject {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPatch {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCategory {
    pub name: String,
    #[serde(default)]
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub project_id: String,
    pub title: String,
    #[serde(default)]
    pub estimate: Option<u32>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub estimate: Option<u32>,
}

/// Reordering instructions produced by drag and drop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReorder {
    #[serde(default)]
    pub projects: Vec<ProjectOrder>,
    #[serde(default)]
    pub categories: Vec<CategoryOrder>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectOrder {
    pub id: String,
    pub sort_order: i64,
    #[serde(default)]
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryOrder {
    pub id: String,
    pub sort_order: i64,
}

/// Outcome of a batch reorder; entries that could not be applied are listed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderReport {
    pub applied: usize,
    pub failed: Vec<String>,
}

impl ReorderReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Represents a single state transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub details: Option<String>,
}

impl TransitionLogEntry {
    pub fn new(action: String, details: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            details,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("No project is open")]
    NoProject,

    #[error("Task '{0}' not found")]
    TaskNotFound(String),

    #[error("Not focused on a task")]
    NotFocused,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error(transparent)]
    Focus(#[from] FocusError),
}

/// Everything a front end needs to draw the current state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub project: Option<Project>,
    pub tree: Task,
    pub focus: FocusState,
    pub current: Option<Task>,
    pub current_parent: Option<Task>,
    pub has_more: bool,
    pub total_estimate: u64,
    pub over_budget: Vec<String>,
    pub completed: Vec<CompletedTask>,
    pub transition_history: Vec<TransitionLogEntry>,
}

const MAX_HISTORY_SIZE: usize = 20;

/// Title shown for the tree when no project is open
const NO_PROJECT_TITLE: &str = "No project";

/// State of the open project: its tree, focus, and what has been done
pub struct Session {
    project: Option<Project>,
    tree: Task,
    navigator: FocusNavigator,
    completed: Vec<CompletedTask>,
    history: VecDeque<TransitionLogEntry>,
    rng: StdRng,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            project: None,
            tree: Task::root(NO_PROJECT_TITLE),
            navigator: FocusNavigator::new(),
            completed: Vec::new(),
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
            rng: StdRng::seed_from_u64(0),
        }
    }

    pub fn project(&self) -> Option<&Project> {
        self.project.as_ref()
    }

    pub fn tree(&self) -> &Task {
        &self.tree
    }

    pub fn navigator(&self) -> &FocusNavigator {
        &self.navigator
    }

    /// Completed tasks, newest first
    pub fn completed(&self) -> &[CompletedTask] {
        &self.completed
    }

    pub fn history(&self) -> &VecDeque<TransitionLogEntry> {
        &self.history
    }

    /// Logs a state transition, maintaining the history buffer size.
    fn log_transition(&mut self, action: &str, details: Option<String>) {
        if self.history.len() == MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history
            .push_back(TransitionLogEntry::new(action.to_string(), details));
    }

    fn open_project_id(&self) -> Result<String, CoreError> {
        self.project
            .as_ref()
            .map(|p| p.id.clone())
            .ok_or(CoreError::NoProject)
    }

    fn require_task(&self, id: &str) -> Result<&Task, CoreError> {
        find(&self.tree, id).ok_or_else(|| CoreError::TaskNotFound(id.to_string()))
    }

    /// Local token for a manually added proposal
    fn manual_token(&mut self) -> String {
        format!("new-{:08x}", self.rng.gen::<u32>())
    }

    fn open(&mut self, project: Project, tree: Task) {
        self.log_transition("open_project", Some(project.name.clone()));
        self.project = Some(project);
        self.tree = tree;
        self.navigator = FocusNavigator::new();
    }

    /// Keeps focus on an existing leaf after the tree was replaced
    fn reconcile_focus(&mut self) {
        match self.navigator.reconcile(&self.tree) {
            Reconcile::Unchanged => {}
            Reconcile::Descended(id) => self.log_transition("descend", Some(id)),
            Reconcile::Lost => {
                tracing::info!("focused task is no longer in the tree; leaving focus mode");
                self.log_transition("focus_lost", None);
            }
        }
    }

    fn close(&mut self) {
        self.log_transition("close_project", self.project.as_ref().map(|p| p.name.clone()));
        self.project = None;
        self.tree = Task::root(NO_PROJECT_TITLE);
        self.navigator = FocusNavigator::new();
    }

    /// Removes `id` locally, records it as done, and moves focus on if it was
    /// the focused leaf.
    fn complete(&mut self, id: &str) -> Result<CompletedTask, CoreError> {
        let node = self.require_task(id)?;
        if node.is_root() {
            return Err(CoreError::Focus(FocusError::Root));
        }
        let record = CompletedTask {
            id: node.id().to_string(),
            title: node.title().to_string(),
            estimate: node.estimate(),
            completed_at: Utc::now(),
            project_name: self
                .project
                .as_ref()
                .map(|p| p.name.clone())
                .unwrap_or_default(),
        };

        if self.navigator.current() == Some(id) {
            let (pruned, advance) = self.navigator.complete_current(&self.tree);
            self.tree = pruned;
            if advance == Advance::Exhausted {
                self.log_transition("focus_complete", None);
            }
        } else {
            self.tree = tree::remove_node(&self.tree, id);
            self.reconcile_focus();
        }

        self.completed.insert(0, record.clone());
        self.log_transition("complete_task", Some(record.title.clone()));
        Ok(record)
    }

    pub fn view(&self) -> SessionView {
        let current = self
            .navigator
            .current()
            .and_then(|id| find(&self.tree, id))
            .cloned();
        let current_parent = self
            .navigator
            .current()
            .and_then(|id| find_parent_of(&self.tree, id))
            .cloned();
        let over_budget = pre_order(&self.tree)
            .into_iter()
            .filter(|node| is_over_budget(node))
            .map(|node| node.id().to_string())
            .collect();

        SessionView {
            project: self.project.clone(),
            tree: self.tree.clone(),
            focus: self.navigator.state().clone(),
            current,
            current_parent,
            has_more: self.navigator.has_more(&self.tree),
            total_estimate: tree::sum_estimate(&self.tree),
            over_budget,
            completed: self.completed.clone(),
            transition_history: self.history.iter().cloned().collect(),
        }
    }
}

/// The application state container.
///
/// The session lock is only ever held for synchronous tree work; storage and
/// generator round-trips happen between lock scopes, and their results are
/// applied to whatever tree is current when they return.
#[derive(Clone)]
pub struct Core {
    store: Arc<dyn TaskStore>,
    generator: Arc<dyn SubtaskGenerator>,
    session: Arc<Mutex<Session>>,
    update_tx: Arc<tokio::sync::broadcast::Sender<()>>,
}

impl Core {
    pub fn new(store: Arc<dyn TaskStore>, generator: Arc<dyn SubtaskGenerator>) -> Self {
        // Create a broadcast channel with capacity for 100 messages
        let (tx, _rx) = tokio::sync::broadcast::channel(100);

        Self {
            store,
            generator,
            session: Arc::new(Mutex::new(Session::new())),
            update_tx: Arc::new(tx),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    // Applies `f` to the session and notifies observers
    fn with_session<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut session = match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = f(&mut session);
        let _ = self.update_tx.send(());
        result
    }

    fn read_session<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Session) -> R,
    {
        let session = match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&session)
    }

    // Like `with_session` but without notifying; for bookkeeping nobody observes
    fn with_session_quiet<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut session = match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut session)
    }

    // Subscribe to state updates
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.update_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionView {
        self.read_session(Session::view)
    }

    fn notify(&self) {
        let _ = self.update_tx.send(());
    }

    // ---- projects and categories ----

    pub async fn list_projects(&self) -> Result<Vec<Project>, CoreError> {
        Ok(self.store.list_projects().await?)
    }

    pub async fn create_project(&self, new: NewProject) -> Result<Project, CoreError> {
        let project = self.store.create_project(new).await?;
        self.notify();
        Ok(project)
    }

    /// Renames a project, keeping the open tree's root title in step
    pub async fn update_project(&self, id: &str, patch: ProjectPatch) -> Result<Project, CoreError> {
        let project = self.store.update_project(id, patch).await?;
        let is_open = self.read_session(|s| s.project().map(|p| p.id == project.id).unwrap_or(false));
        if is_open {
            self.refresh().await;
        } else {
            self.notify();
        }
        Ok(project)
    }

    /// Deletes a project and its tasks, closing it if it is open
    pub async fn delete_project(&self, id: &str) -> Result<(), CoreError> {
        self.store.delete_project(id).await?;
        self.with_session(|session| {
            if session.project().map(|p| p.id == id).unwrap_or(false) {
                session.close();
            }
        });
        Ok(())
    }

    pub async fn list_categories(&self) -> Result<Vec<Category>, CoreError> {
        Ok(self.store.list_categories().await?)
    }

    pub async fn create_category(&self, new: NewCategory) -> Result<Category, CoreError> {
        let category = self.store.create_category(new).await?;
        self.notify();
        Ok(category)
    }

    pub async fn update_category(&self, id: &str, patch: CategoryPatch) -> Result<Category, CoreError> {
        let category = self.store.update_category(id, patch).await?;
        self.notify();
        Ok(category)
    }

    pub async fn delete_category(&self, id: &str) -> Result<(), CoreError> {
        self.store.delete_category(id).await?;
        self.notify();
        Ok(())
    }

    pub async fn batch_reorder(&self, reorder: BatchReorder) -> Result<ReorderReport, CoreError> {
        let report = self.store.batch_reorder(reorder).await?;
        if !report.is_complete() {
            tracing::warn!(failed = ?report.failed, "some reorder entries were not applied");
        }
        self.notify();
        Ok(report)
    }

    pub async fn list_tasks(&self, project_id: &str) -> Result<Vec<FlatRow>, CoreError> {
        Ok(self.store.list_tasks(project_id).await?)
    }

    /// Creates a storage row directly; the open tree is rebuilt afterwards
    pub async fn create_row(&self, new: NewTask) -> Result<FlatRow, CoreError> {
        let row = self.store.create_task(new).await?;
        self.refresh().await;
        Ok(row)
    }

    pub async fn update_row(&self, id: &str, patch: TaskPatch) -> Result<FlatRow, CoreError> {
        let row = self.store.update_task(id, patch).await?;
        self.refresh().await;
        Ok(row)
    }

    pub async fn delete_row(&self, id: &str) -> Result<(), CoreError> {
        self.store.delete_task(id).await?;
        self.refresh().await;
        Ok(())
    }

    /// Raw generator call, outside of any open tree
    pub async fn generate(
        &self,
        task_title: &str,
        context: &str,
    ) -> Result<Vec<GeneratedSubtask>, CoreError> {
        self.generator
            .generate(task_title, context)
            .await
            .map_err(|e| {
                tracing::error!(task_title = %task_title, error = %e, "subtask generation failed");
                CoreError::from(e)
            })
    }

    // ---- the open project ----

    /// Fetches a project's rows and makes its tree the session tree
    pub async fn open_project(&self, project_id: &str) -> Result<SessionView, CoreError> {
        let project = self.store.get_project(project_id).await?;
        let rows = self.store.list_tasks(project_id).await?;
        let tree = build_tree(&rows, &project.name);
        Ok(self.with_session(|session| {
            session.open(project, tree);
            session.view()
        }))
    }

    /// Refetches the open project and rebuilds its tree.
    ///
    /// On failure the previous tree stays in place. A result for a project
    /// that was closed or switched in the meantime is discarded.
    pub async fn refresh(&self) {
        let Some(project_id) = self.read_session(|s| s.project().map(|p| p.id.clone())) else {
            return;
        };
        let fetched = async {
            let project = self.store.get_project(&project_id).await?;
            let rows = self.store.list_tasks(&project_id).await?;
            Ok::<_, StoreError>((project, rows))
        }
        .await;

        match fetched {
            Ok((project, rows)) => {
                let tree = build_tree(&rows, &project.name);
                self.with_session(|session| {
                    if session.project().map(|p| p.id.as_str()) == Some(project.id.as_str()) {
                        session.project = Some(project);
                        session.tree = tree;
                        session.reconcile_focus();
                    }
                });
            }
            Err(e) => {
                tracing::error!(project_id = %project_id, error = %e, "failed to refetch tasks; keeping previous tree");
                self.notify();
            }
        }
    }

    /// Flips a node's expansion flag; local only
    pub fn toggle(&self, id: &str) -> SessionView {
        self.with_session(|session| {
            session.tree = tree::toggle_expansion(&session.tree, id);
            session.log_transition("toggle", Some(id.to_string()));
            session.view()
        })
    }

    // ---- focus ----

    pub fn focus(&self, id: &str) -> Result<SessionView, CoreError> {
        self.with_session(|session| {
            session.open_project_id()?;
            session.navigator.enter(&session.tree, id)?;
            session.log_transition("focus", Some(id.to_string()));
            Ok(session.view())
        })
    }

    pub fn advance(&self) -> SessionView {
        self.with_session(|session| {
            let step = session.navigator.advance(&session.tree);
            match step {
                Advance::Next(id) => session.log_transition("advance", Some(id)),
                Advance::Exhausted => session.log_transition("focus_complete", None),
                Advance::Idle => {}
            }
            session.view()
        })
    }

    pub fn exit_focus(&self) -> SessionView {
        self.with_session(|session| {
            session.navigator.exit();
            session.log_transition("exit_focus", None);
            session.view()
        })
    }

    /// Marks the focused leaf done
    pub async fn complete_current(&self) -> Result<SessionView, CoreError> {
        let current = self
            .read_session(|s| s.navigator().current().map(str::to_string))
            .ok_or(CoreError::NotFocused)?;
        self.complete_task(&current).await
    }

    /// Marks a task done: the snapshot and the local removal happen first,
    /// then storage is told. A failed storage delete is only logged.
    pub async fn complete_task(&self, id: &str) -> Result<SessionView, CoreError> {
        let (record, view) = self.with_session(|session| {
            session.open_project_id()?;
            let record = session.complete(id)?;
            Ok::<_, CoreError>((record, session.view()))
        })?;

        if let Err(e) = self.store.delete_task(&record.id).await {
            tracing::error!(task_id = %record.id, error = %e, "failed to delete completed task from storage");
        }
        Ok(view)
    }

    // ---- task edits ----

    /// Creates a task under `parent_id` (`root` for a top-level task)
    pub async fn add_task(
        &self,
        parent_id: &str,
        title: String,
        estimate: Option<u32>,
    ) -> Result<SessionView, CoreError> {
        let project_id = self.read_session(|session| {
            let project_id = session.open_project_id()?;
            session.require_task(parent_id)?;
            Ok::<_, CoreError>(project_id)
        })?;

        let new = NewTask {
            project_id,
            title,
            estimate,
            parent_id: (parent_id != ROOT_ID).then(|| parent_id.to_string()),
        };
        let row = self.store.create_task(new).await?;
        self.with_session(|s| s.log_transition("add_task", Some(row.title.clone())));
        self.refresh().await;
        Ok(self.snapshot())
    }

    pub async fn edit_task(&self, id: &str, patch: TaskPatch) -> Result<SessionView, CoreError> {
        self.read_session(|session| {
            session.open_project_id()?;
            session.require_task(id).map(|_| ())
        })?;
        let row = self.store.update_task(id, patch).await?;
        self.with_session(|s| s.log_transition("edit_task", Some(row.title.clone())));
        self.refresh().await;
        Ok(self.snapshot())
    }

    /// Deletes a task and its subtree from storage
    pub async fn delete_task(&self, id: &str) -> Result<SessionView, CoreError> {
        self.read_session(|session| {
            session.open_project_id()?;
            session.require_task(id).map(|_| ())
        })?;
        self.store.delete_task(id).await?;
        self.with_session(|s| s.log_transition("delete_task", Some(id.to_string())));
        self.refresh().await;
        Ok(self.snapshot())
    }

    // ---- splitting ----

    /// Parent and sibling context for splitting `id`
    pub fn split_context(&self, id: &str) -> Result<String, CoreError> {
        self.read_session(|session| {
            session.open_project_id()?;
            Ok(build_context(&session.tree, id))
        })
    }

    /// Asks the generator to break `id` into steps
    pub async fn propose_subtasks(&self, id: &str) -> Result<Vec<ProposedSubtask>, CoreError> {
        let (title, context) = self.read_session(|session| {
            session.open_project_id()?;
            let node = session.require_task(id)?;
            Ok::<_, CoreError>((node.title().to_string(), build_context(&session.tree, id)))
        })?;

        match self.generator.generate(&title, &context).await {
            Ok(generated) => {
                let proposals = into_proposals(generated, Utc::now().timestamp_millis());
                self.with_session(|s| {
                    s.log_transition("propose_subtasks", Some(format!("{} -> {}", id, proposals.len())))
                });
                Ok(proposals)
            }
            Err(e) => {
                tracing::error!(task_id = %id, error = %e, "subtask generation failed");
                Err(e.into())
            }
        }
    }

    /// A selected proposal typed in by the user
    pub fn manual_proposal(&self, title: String, estimate: u32) -> ProposedSubtask {
        self.with_session_quiet(|session| ProposedSubtask::new(session.manual_token(), title, estimate))
    }

    pub fn proposal_budget(
        &self,
        id: &str,
        proposals: &[ProposedSubtask],
    ) -> Result<ProposalBudget, CoreError> {
        self.read_session(|session| {
            let node = session.require_task(id)?;
            Ok(ProposalBudget::summarize(node.estimate(), proposals))
        })
    }

    /// The tree with the selected proposals added after `id`'s existing
    /// children, as [`Core::apply_subtasks`] saves them; storage is not touched
    pub fn preview_split(&self, id: &str, proposals: &[ProposedSubtask]) -> Result<Task, CoreError> {
        self.read_session(|session| {
            session.require_task(id)?;
            Ok(tree::append_subtasks(&session.tree, id, proposals))
        })
    }

    /// Persists the selected proposals as children of `id` and rebuilds. When
    /// `id` was the focused leaf the rebuild moves focus into its first subtask.
    pub async fn apply_subtasks(
        &self,
        id: &str,
        proposals: &[ProposedSubtask],
    ) -> Result<SessionView, CoreError> {
        let project_id = self.read_session(|session| {
            let project_id = session.open_project_id()?;
            session.require_task(id)?;
            Ok::<_, CoreError>(project_id)
        })?;
        let parent_id = (id != ROOT_ID).then(|| id.to_string());

        let mut created = 0;
        for proposal in proposals.iter().filter(|p| p.selected) {
            let new = NewTask {
                project_id: project_id.clone(),
                title: proposal.title.clone(),
                estimate: Some(proposal.estimate),
                parent_id: parent_id.clone(),
            };
            match self.store.create_task(new).await {
                Ok(_) => created += 1,
                Err(e) => {
                    tracing::error!(task_id = %id, proposal = %proposal.title, error = %e, "failed to save subtask");
                }
            }
        }

        self.refresh().await;
        Ok(self.with_session(|session| {
            session.log_transition("apply_subtasks", Some(format!("{} +{}", id, created)));
            session.view()
        }))
    }
}
