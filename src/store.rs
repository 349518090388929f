//! Persistence boundary
//!
//! [`TaskStore`] is the small set of data operations the application needs
//! from storage. [`MemoryStore`] keeps everything in process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::models::{
    BatchReorder, Category, CategoryPatch, FlatRow, NewCategory, NewProject, NewTask, Project,
    ProjectPatch, ReorderReport, TaskPatch,
};

const DEFAULT_EMOJI: &str = "🎯";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    fn project(id: &str) -> Self {
        Self::NotFound {
            kind: "Project",
            id: id.to_string(),
        }
    }

    fn category(id: &str) -> Self {
        Self::NotFound {
            kind: "Category",
            id: id.to_string(),
        }
    }

    fn task(id: &str) -> Self {
        Self::NotFound {
            kind: "Task",
            id: id.to_string(),
        }
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Projects by `sort_order`, newest first among equals
    async fn list_projects(&self) -> Result<Vec<Project>, StoreError>;

    async fn get_project(&self, id: &str) -> Result<Project, StoreError>;

    async fn create_project(&self, new: NewProject) -> Result<Project, StoreError>;

    async fn update_project(&self, id: &str, patch: ProjectPatch) -> Result<Project, StoreError>;

    /// Deletes a project and all of its tasks
    async fn delete_project(&self, id: &str) -> Result<(), StoreError>;

    /// Categories by `sort_order`
    async fn list_categories(&self) -> Result<Vec<Category>, StoreError>;

    async fn create_category(&self, new: NewCategory) -> Result<Category, StoreError>;

    async fn update_category(&self, id: &str, patch: CategoryPatch) -> Result<Category, StoreError>;

    /// Deletes a category; its projects become uncategorized
    async fn delete_category(&self, id: &str) -> Result<(), StoreError>;

    /// Applies every entry it can and lists the ones it could not
    async fn batch_reorder(&self, reorder: BatchReorder) -> Result<ReorderReport, StoreError>;

    /// A project's tasks in creation order
    async fn list_tasks(&self, project_id: &str) -> Result<Vec<FlatRow>, StoreError>;

    async fn create_task(&self, new: NewTask) -> Result<FlatRow, StoreError>;

    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<FlatRow, StoreError>;

    /// Deletes a task and its descendants
    async fn delete_task(&self, id: &str) -> Result<(), StoreError>;
}

struct TaskRecord {
    project_id: String,
    row: FlatRow,
}

#[derive(Default)]
struct StoreState {
    // insertion order is creation order
    projects: Vec<Project>,
    categories: Vec<Category>,
    tasks: Vec<TaskRecord>,
    next_id: u64,
}

impl StoreState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{}", prefix, self.next_id)
    }

    fn project_mut(&mut self, id: &str) -> Result<&mut Project, StoreError> {
        self.projects
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| StoreError::project(id))
    }

    fn category_mut(&mut self, id: &str) -> Result<&mut Category, StoreError> {
        self.categories
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::category(id))
    }

    fn has_category(&self, id: &str) -> bool {
        self.categories.iter().any(|c| c.id == id)
    }

    fn reorder_project(&mut self, id: &str, sort_order: i64, category_id: Option<String>) -> Result<(), StoreError> {
        if let Some(category) = &category_id {
            if !self.has_category(category) {
                return Err(StoreError::category(category));
            }
        }
        let project = self.project_mut(id)?;
        project.sort_order = sort_order;
        project.category_id = category_id;
        Ok(())
    }
}

fn require_name(name: &str, what: &str) -> Result<String, StoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(StoreError::Validation(format!("{} name is required", what)));
    }
    Ok(trimmed.to_string())
}

/// In-process storage
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When unavailable, every operation fails with [`StoreError::Unavailable`]
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    fn with_state<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut StoreState) -> Result<R, StoreError>,
    {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
        self.with_state(|state| {
            let mut projects: Vec<Project> = state.projects.iter().rev().cloned().collect();
            projects.sort_by_key(|p| p.sort_order);
            Ok(projects)
        })
    }

    async fn get_project(&self, id: &str) -> Result<Project, StoreError> {
        self.with_state(|state| state.project_mut(id).map(|p| p.clone()))
    }

    async fn create_project(&self, new: NewProject) -> Result<Project, StoreError> {
        self.with_state(|state| {
            let name = require_name(&new.name, "Project")?;
            if let Some(category) = &new.category_id {
                if !state.has_category(category) {
                    return Err(StoreError::category(category));
                }
            }
            let project = Project {
                id: state.next_id("p"),
                name,
                emoji: new
                    .emoji
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_EMOJI.to_string()),
                mode: new.mode.unwrap_or_default(),
                context: new.context,
                category_id: new.category_id,
                sort_order: 0,
                created_at: Utc::now(),
            };
            state.projects.push(project.clone());
            Ok(project)
        })
    }

    async fn update_project(&self, id: &str, patch: ProjectPatch) -> Result<Project, StoreError> {
        self.with_state(|state| {
            let name = require_name(&patch.name, "Project")?;
            let project = state.project_mut(id)?;
            project.name = name;
            Ok(project.clone())
        })
    }

    async fn delete_project(&self, id: &str) -> Result<(), StoreError> {
        self.with_state(|state| {
            state.project_mut(id)?;
            state.projects.retain(|p| p.id != id);
            state.tasks.retain(|t| t.project_id != id);
            Ok(())
        })
    }

    async fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        self.with_state(|state| {
            let mut categories = state.categories.clone();
            categories.sort_by_key(|c| c.sort_order);
            Ok(categories)
        })
    }

    async fn create_category(&self, new: NewCategory) -> Result<Category, StoreError> {
        self.with_state(|state| {
            let category = Category {
                id: state.next_id("c"),
                name: require_name(&new.name, "Category")?,
                sort_order: new.sort_order.unwrap_or(0),
            };
            state.categories.push(category.clone());
            Ok(category)
        })
    }

    async fn update_category(&self, id: &str, patch: CategoryPatch) -> Result<Category, StoreError> {
        self.with_state(|state| {
            let name = patch
                .name
                .as_deref()
                .map(|n| require_name(n, "Category"))
                .transpose()?;
            let category = state.category_mut(id)?;
            if let Some(name) = name {
                category.name = name;
            }
            if let Some(sort_order) = patch.sort_order {
                category.sort_order = sort_order;
            }
            Ok(category.clone())
        })
    }

    async fn delete_category(&self, id: &str) -> Result<(), StoreError> {
        self.with_state(|state| {
            state.category_mut(id)?;
            state.categories.retain(|c| c.id != id);
            for project in state
                .projects
                .iter_mut()
                .filter(|p| p.category_id.as_deref() == Some(id))
            {
                project.category_id = None;
            }
            Ok(())
        })
    }

    async fn batch_reorder(&self, reorder: BatchReorder) -> Result<ReorderReport, StoreError> {
        self.with_state(|state| {
            let mut report = ReorderReport::default();
            for entry in reorder.projects {
                match state.reorder_project(&entry.id, entry.sort_order, entry.category_id) {
                    Ok(()) => report.applied += 1,
                    Err(e) => report.failed.push(format!("Project {}: {}", entry.id, e)),
                }
            }
            for entry in reorder.categories {
                match state.category_mut(&entry.id) {
                    Ok(category) => {
                        category.sort_order = entry.sort_order;
                        report.applied += 1;
                    }
                    Err(e) => report.failed.push(format!("Category {}: {}", entry.id, e)),
                }
            }
            Ok(report)
        })
    }

    async fn list_tasks(&self, project_id: &str) -> Result<Vec<FlatRow>, StoreError> {
        self.with_state(|state| {
            Ok(state
                .tasks
                .iter()
                .filter(|t| t.project_id == project_id)
                .map(|t| t.row.clone())
                .collect())
        })
    }

    async fn create_task(&self, new: NewTask) -> Result<FlatRow, StoreError> {
        self.with_state(|state| {
            let title = new.title.trim();
            if title.is_empty() {
                return Err(StoreError::Validation("Task title is required".to_string()));
            }
            state.project_mut(&new.project_id)?;
            if let Some(parent) = &new.parent_id {
                let same_project = state
                    .tasks
                    .iter()
                    .any(|t| &t.row.id == parent && t.project_id == new.project_id);
                if !same_project {
                    return Err(StoreError::task(parent));
                }
            }
            let row = FlatRow {
                id: state.next_id("t"),
                title: title.to_string(),
                estimate: new.estimate.unwrap_or(0),
                parent_id: new.parent_id,
            };
            state.tasks.push(TaskRecord {
                project_id: new.project_id,
                row: row.clone(),
            });
            Ok(row)
        })
    }

    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<FlatRow, StoreError> {
        self.with_state(|state| {
            let title = match patch.title.as_deref().map(str::trim) {
                Some("") => {
                    return Err(StoreError::Validation("Task title is required".to_string()))
                }
                other => other.map(str::to_string),
            };
            let record = state
                .tasks
                .iter_mut()
                .find(|t| t.row.id == id)
                .ok_or_else(|| StoreError::task(id))?;
            if let Some(title) = title {
                record.row.title = title;
            }
            if let Some(estimate) = patch.estimate {
                record.row.estimate = estimate;
            }
            Ok(record.row.clone())
        })
    }

    async fn delete_task(&self, id: &str) -> Result<(), StoreError> {
        self.with_state(|state| {
            if !state.tasks.iter().any(|t| t.row.id == id) {
                return Err(StoreError::task(id));
            }
            let mut doomed = vec![id.to_string()];
            let mut frontier = vec![id.to_string()];
            while let Some(parent) = frontier.pop() {
                for record in &state.tasks {
                    if record.row.parent_id.as_deref() == Some(parent.as_str()) {
                        doomed.push(record.row.id.clone());
                        frontier.push(record.row.id.clone());
                    }
                }
            }
            state.tasks.retain(|t| !doomed.contains(&t.row.id));
            Ok(())
        })
    }
}

/// Seeds a demo project through the store's own operations
pub async fn seed_example(store: &dyn TaskStore) -> Result<Project, StoreError> {
    let project = store
        .create_project(NewProject {
            name: "Produce Music Album".to_string(),
            emoji: Some("🎵".to_string()),
            mode: Some(crate::models::ProjectMode::Creative),
            context: Some("Home studio, solo artist".to_string()),
            category_id: None,
        })
        .await?;

    // (title, estimate, index of parent in this list)
    let outline: [(&str, u32, Option<usize>); 11] = [
        ("Compose Songs", 120, None),
        ("Write Melodies", 60, Some(0)),
        ("Write Lyrics", 60, Some(0)),
        ("Record Piano Piece", 30, None),
        ("Setup & Gear", 5, Some(3)),
        ("Recording Phase", 20, Some(3)),
        ("Warm up scales", 5, Some(5)),
        ("Take 1", 5, Some(5)),
        ("Take 2", 10, Some(5)),
        ("File Management", 10, Some(3)),
        ("Mix and Master", 150, None),
    ];

    let mut ids: Vec<String> = Vec::with_capacity(outline.len());
    for (title, estimate, parent) in outline {
        let row = store
            .create_task(NewTask {
                project_id: project.id.clone(),
                title: title.to_string(),
                estimate: Some(estimate),
                parent_id: parent.and_then(|i| ids.get(i).cloned()),
            })
            .await?;
        ids.push(row.id);
    }
    Ok(project)
}
