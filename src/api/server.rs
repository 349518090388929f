//! API Server module
//!
//! HTTP API over the [`Core`]: project, category and task storage endpoints,
//! the generate endpoint, and the session endpoints that drive the open tree.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, patch, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::focus::{FocusError, FocusState};
use crate::generate::{GenerateError, GeneratedSubtask};
use crate::models::{
    BatchReorder, CategoryPatch, CoreError, NewCategory, NewProject, NewTask, ProjectPatch,
    ProposalBudget, ProposedSubtask, SessionView, TaskPatch,
};
use crate::store::StoreError;
use crate::tree::{is_over_budget, sum_estimate, Task};
use crate::Core;

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenProjectRequest {
    pub project_id: String,
}

/// Request naming a single node of the open tree
#[derive(Serialize, Deserialize)]
pub struct NodeRequest {
    pub id: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitRequest {
    pub task_id: String,
    pub proposals: Vec<ProposedSubtask>,
}

#[derive(Serialize, Deserialize)]
pub struct SplitPreview {
    pub tree: Task,
    pub budget: ProposalBudget,
}

#[derive(Serialize, Deserialize)]
pub struct ManualProposalRequest {
    pub title: String,
    #[serde(default)]
    pub estimate: u32,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTaskRequest {
    pub parent_id: String,
    pub title: String,
    #[serde(default)]
    pub estimate: Option<u32>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub task_title: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct GenerateResponse {
    pub tasks: Vec<GeneratedSubtask>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TasksQuery {
    project_id: Option<String>,
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 3000).into(),
        }
    }
}

/// API responses
#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

fn status_for(error: &CoreError) -> StatusCode {
    match error {
        CoreError::TaskNotFound(_)
        | CoreError::Focus(FocusError::NotFound(_))
        | CoreError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        CoreError::NoProject
        | CoreError::NotFocused
        | CoreError::Focus(_)
        | CoreError::Store(StoreError::Validation(_))
        | CoreError::Generate(GenerateError::MissingTitle) => StatusCode::BAD_REQUEST,
        CoreError::Generate(_) => StatusCode::BAD_GATEWAY,
        CoreError::Store(StoreError::Unavailable(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Helper function to map Core results to Axum responses
fn map_core_result<T: Serialize>(result: Result<T, CoreError>) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))).into_response(),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                tracing::error!(error = %e, "request failed");
            }
            (status, Json(ApiResponse::<T>::error(e.to_string()))).into_response()
        }
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error(message.to_string())),
    )
        .into_response()
}

/// Builds the application router
pub fn router(core: Core) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { Redirect::temporary("/ui") }))
        // --- Storage --- //
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/:id",
            patch(update_project).delete(delete_project),
        )
        .route("/api/categories", get(list_categories).post(create_category))
        .route(
            "/api/categories/:id",
            patch(update_category).delete(delete_category),
        )
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/:id", patch(update_task).delete(delete_task))
        .route("/api/batch", patch(batch_reorder))
        .route("/api/generate", post(generate))
        // --- Session --- //
        .route("/api/session", get(get_session))
        .route("/api/session/open", post(open_project))
        .route("/api/session/toggle", post(toggle))
        .route("/api/session/context/:id", get(split_context))
        .route("/api/session/propose/:id", post(propose_subtasks))
        .route("/api/session/proposals", post(manual_proposal))
        .route("/api/session/preview", post(preview_split))
        .route("/api/session/apply", post(apply_subtasks))
        .route("/api/session/focus", post(focus))
        .route("/api/session/advance", post(advance))
        .route("/api/session/complete", post(complete_current))
        .route("/api/session/exit", post(exit_focus))
        .route("/api/session/tasks", post(add_session_task))
        .route(
            "/api/session/tasks/:id",
            patch(edit_session_task).delete(delete_session_task),
        )
        .route("/api/session/tasks/:id/complete", post(complete_task))
        // --- UI --- //
        .route("/ui", get(ui_handler))
        .route("/ui/events", get(events_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(core)
}

/// Starts the API server
pub async fn serve(core: Core, config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();

    let app = router(core);

    tracing::info!("Starting server on {}", config.address);
    let listener = TcpListener::bind(config.address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Storage Handlers --- //

async fn list_projects(State(core): State<Core>) -> Response {
    map_core_result(core.list_projects().await)
}

async fn create_project(State(core): State<Core>, Json(payload): Json<NewProject>) -> Response {
    map_core_result(core.create_project(payload).await)
}

async fn update_project(
    State(core): State<Core>,
    Path(id): Path<String>,
    Json(payload): Json<ProjectPatch>,
) -> Response {
    map_core_result(core.update_project(&id, payload).await)
}

async fn delete_project(State(core): State<Core>, Path(id): Path<String>) -> Response {
    map_core_result(core.delete_project(&id).await)
}

async fn list_categories(State(core): State<Core>) -> Response {
    map_core_result(core.list_categories().await)
}

async fn create_category(State(core): State<Core>, Json(payload): Json<NewCategory>) -> Response {
    map_core_result(core.create_category(payload).await)
}

async fn update_category(
    State(core): State<Core>,
    Path(id): Path<String>,
    Json(payload): Json<CategoryPatch>,
) -> Response {
    map_core_result(core.update_category(&id, payload).await)
}

async fn delete_category(State(core): State<Core>, Path(id): Path<String>) -> Response {
    map_core_result(core.delete_category(&id).await)
}

async fn list_tasks(State(core): State<Core>, Query(query): Query<TasksQuery>) -> Response {
    match query.project_id {
        Some(project_id) => map_core_result(core.list_tasks(&project_id).await),
        None => bad_request("projectId is required"),
    }
}

async fn create_task(State(core): State<Core>, Json(payload): Json<NewTask>) -> Response {
    map_core_result(core.create_row(payload).await)
}

async fn update_task(
    State(core): State<Core>,
    Path(id): Path<String>,
    Json(payload): Json<TaskPatch>,
) -> Response {
    map_core_result(core.update_row(&id, payload).await)
}

async fn delete_task(State(core): State<Core>, Path(id): Path<String>) -> Response {
    map_core_result(core.delete_row(&id).await)
}

async fn batch_reorder(State(core): State<Core>, Json(payload): Json<BatchReorder>) -> Response {
    map_core_result(core.batch_reorder(payload).await)
}

async fn generate(State(core): State<Core>, Json(payload): Json<GenerateRequest>) -> Response {
    let context = payload.context.unwrap_or_default();
    let result = core
        .generate(&payload.task_title, &context)
        .await
        .map(|tasks| GenerateResponse { tasks });
    map_core_result(result)
}

// --- Session Handlers --- //

async fn get_session(State(core): State<Core>) -> Response {
    map_core_result::<SessionView>(Ok(core.snapshot()))
}

async fn open_project(
    State(core): State<Core>,
    Json(payload): Json<OpenProjectRequest>,
) -> Response {
    map_core_result(core.open_project(&payload.project_id).await)
}

async fn toggle(State(core): State<Core>, Json(payload): Json<NodeRequest>) -> Response {
    map_core_result::<SessionView>(Ok(core.toggle(&payload.id)))
}

async fn split_context(State(core): State<Core>, Path(id): Path<String>) -> Response {
    map_core_result(core.split_context(&id))
}

async fn propose_subtasks(State(core): State<Core>, Path(id): Path<String>) -> Response {
    map_core_result(core.propose_subtasks(&id).await)
}

async fn manual_proposal(
    State(core): State<Core>,
    Json(payload): Json<ManualProposalRequest>,
) -> Response {
    if payload.title.trim().is_empty() {
        return bad_request("title is required");
    }
    map_core_result::<ProposedSubtask>(Ok(core.manual_proposal(payload.title, payload.estimate)))
}

async fn preview_split(State(core): State<Core>, Json(payload): Json<SplitRequest>) -> Response {
    let result = core
        .preview_split(&payload.task_id, &payload.proposals)
        .and_then(|tree| {
            let budget = core.proposal_budget(&payload.task_id, &payload.proposals)?;
            Ok(SplitPreview { tree, budget })
        });
    map_core_result(result)
}

async fn apply_subtasks(State(core): State<Core>, Json(payload): Json<SplitRequest>) -> Response {
    map_core_result(
        core.apply_subtasks(&payload.task_id, &payload.proposals)
            .await,
    )
}

async fn focus(State(core): State<Core>, Json(payload): Json<NodeRequest>) -> Response {
    map_core_result(core.focus(&payload.id))
}

async fn advance(State(core): State<Core>) -> Response {
    map_core_result::<SessionView>(Ok(core.advance()))
}

async fn complete_current(State(core): State<Core>) -> Response {
    map_core_result(core.complete_current().await)
}

async fn exit_focus(State(core): State<Core>) -> Response {
    map_core_result::<SessionView>(Ok(core.exit_focus()))
}

async fn add_session_task(State(core): State<Core>, Json(payload): Json<AddTaskRequest>) -> Response {
    map_core_result(
        core.add_task(&payload.parent_id, payload.title, payload.estimate)
            .await,
    )
}

async fn edit_session_task(
    State(core): State<Core>,
    Path(id): Path<String>,
    Json(payload): Json<TaskPatch>,
) -> Response {
    map_core_result(core.edit_task(&id, payload).await)
}

async fn delete_session_task(State(core): State<Core>, Path(id): Path<String>) -> Response {
    map_core_result(core.delete_task(&id).await)
}

async fn complete_task(State(core): State<Core>, Path(id): Path<String>) -> Response {
    map_core_result(core.complete_task(&id).await)
}

// --- UI and Event Handlers --- //

async fn events_handler(State(core): State<Core>) -> impl IntoResponse {
    let stream = update_events(core);

    let headers = [
        (
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("text/event-stream"),
        ),
        (
            axum::http::header::CACHE_CONTROL,
            axum::http::HeaderValue::from_static("no-cache"),
        ),
    ];

    (headers, axum::body::Body::from_stream(stream))
}

const UPDATE_EVENT: &str = "event: update\ndata: change\n\n";

/// One server-sent event per state change
fn update_events(core: Core) -> impl Stream<Item = Result<String, Infallible>> {
    let receiver = core.subscribe();
    stream::unfold((core, receiver), |(core, mut receiver)| async move {
        loop {
            match receiver.recv().await {
                // A lagging client only needs to know something changed
                Ok(()) | Err(RecvError::Lagged(_)) => {
                    return Some((Ok(UPDATE_EVENT.to_string()), (core, receiver)))
                }
                Err(RecvError::Closed) => receiver = core.subscribe(),
            }
        }
    })
}

async fn ui_handler(State(core): State<Core>) -> Html<String> {
    Html(render_ui(&core.snapshot()))
}

fn render_ui(view: &SessionView) -> String {
    let mut html = String::from(HTML_TEMPLATE_HEADER);

    match &view.project {
        Some(project) => {
            html.push_str(&format!(
                "<h1>{} {}</h1>",
                html_escape::encode_text(&project.emoji),
                html_escape::encode_text(&project.name)
            ));
            html.push_str(&format!(
                "<p class='summary'>Total: {} min &middot; {}</p>",
                view.total_estimate,
                focus_label(&view.focus)
            ));
            let current = view.current.as_ref().map(|t| t.id());
            if view.tree.children().is_empty() {
                html.push_str("<p>No tasks yet.</p>");
            } else {
                render_tasks_html(&mut html, view.tree.children(), current);
            }
        }
        None => html.push_str(
            "<h1>No project open</h1><p>Open one with <code>fractal open &lt;id&gt;</code>.</p>",
        ),
    }

    if !view.completed.is_empty() {
        html.push_str("<h2>Completed</h2><ul class='completed'>");
        for done in &view.completed {
            html.push_str(&format!(
                "<li>{} <span class='estimate'>{}m</span></li>",
                html_escape::encode_text(&done.title),
                done.estimate
            ));
        }
        html.push_str("</ul>");
    }

    html.push_str(HTML_TEMPLATE_FOOTER);
    html
}

fn focus_label(state: &FocusState) -> &'static str {
    match state {
        FocusState::Tree => "browsing",
        FocusState::Focus { .. } => "focused",
        FocusState::Complete => "all done",
    }
}

fn render_tasks_html(html: &mut String, tasks: &[std::sync::Arc<Task>], current: Option<&str>) {
    html.push_str("<ul class='task-tree'>");
    for task in tasks {
        let class = if current == Some(task.id()) { "current" } else { "" };
        html.push_str(&format!("<li class='{}'><div class='task-item'>", class));
        html.push_str(&format!(
            "<span class='task-title'>{}</span>",
            html_escape::encode_text(task.title())
        ));
        html.push_str(&format!(
            "<span class='estimate'>{}m</span>",
            task.estimate()
        ));
        if is_over_budget(task) {
            html.push_str(&format!(
                "<span class='over-budget'>{}m planned</span>",
                sum_estimate(task)
            ));
        }
        html.push_str("</div>");
        if !task.is_leaf() && task.is_expanded() {
            render_tasks_html(html, task.children(), current);
        }
        html.push_str("</li>");
    }
    html.push_str("</ul>");
}

const HTML_TEMPLATE_HEADER: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Fractal Focus</title>
    <style>
        body { font-family: sans-serif; max-width: 48rem; margin: 2rem auto; color: #222; }
        .task-tree { list-style: none; padding-left: 1.25rem; }
        .task-item { display: flex; gap: 0.75rem; padding: 0.2rem 0; }
        .current > .task-item { font-weight: bold; background: #fff6d5; }
        .estimate { color: #666; }
        .over-budget { color: #b00020; }
        .summary { color: #444; }
    </style>
</head>
<body>
"#;

const HTML_TEMPLATE_FOOTER: &str = r#"
    <script>
        const events = new EventSource('/ui/events');
        events.addEventListener('update', () => window.location.reload());
    </script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::CannedGenerator;
    use crate::models::Project;
    use crate::store::MemoryStore;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt; // for `collect`
    use pretty_assertions::assert_eq;
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt; // for `oneshot`

    const REPLY: &str = r#"{"tasks": [{"title": "Warm up", "estimate": 5}, {"title": "Take 1", "estimate": 10}]}"#;

    fn setup_test_app() -> (Core, Router) {
        let core = Core::new(
            Arc::new(MemoryStore::new()),
            Arc::new(CannedGenerator::replying(REPLY)),
        );
        (core.clone(), router(core))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("Content-Type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    async fn request_json<T: DeserializeOwned + Serialize>(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> T {
        let (status, bytes) = send(app, method, uri, body).await;
        let parsed: ApiResponse<T> = serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            panic!("{} {}: {} ({})", method, uri, e, String::from_utf8_lossy(&bytes))
        });
        assert!(status.is_success(), "{} {} failed: {:?}", method, uri, parsed.error);
        parsed.data.expect("response data")
    }

    async fn open_album(app: &Router) -> Project {
        let project: Project =
            request_json(app, "POST", "/api/projects", Some(json!({"name": "Album"}))).await;
        let _: SessionView = request_json(
            app,
            "POST",
            "/api/session/open",
            Some(json!({"projectId": project.id})),
        )
        .await;
        project
    }

    #[tokio::test]
    async fn test_split_and_focus_flow() {
        let (_core, app) = setup_test_app();
        open_album(&app).await;

        let view: SessionView = request_json(
            &app,
            "POST",
            "/api/session/tasks",
            Some(json!({"parentId": "root", "title": "Record", "estimate": 30})),
        )
        .await;
        let record = view.tree.children()[0].id().to_string();

        let view: SessionView =
            request_json(&app, "POST", "/api/session/focus", Some(json!({"id": record}))).await;
        assert_eq!(view.focus, FocusState::Focus { current_id: record.clone() });

        let proposals: Vec<ProposedSubtask> =
            request_json(&app, "POST", &format!("/api/session/propose/{}", record), None).await;
        assert_eq!(proposals.len(), 2);

        let preview: SplitPreview = request_json(
            &app,
            "POST",
            "/api/session/preview",
            Some(json!({"taskId": record, "proposals": proposals})),
        )
        .await;
        assert_eq!(preview.budget.selected_total, 15);
        assert!(!preview.budget.over_budget);

        let view: SessionView = request_json(
            &app,
            "POST",
            "/api/session/apply",
            Some(json!({"taskId": record, "proposals": proposals})),
        )
        .await;
        assert_eq!(view.current.map(|t| t.title().to_string()), Some("Warm up".into()));
        assert!(view.has_more);

        let view: SessionView = request_json(&app, "POST", "/api/session/complete", None).await;
        assert_eq!(view.current.map(|t| t.title().to_string()), Some("Take 1".into()));
        assert_eq!(view.completed.len(), 1);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (_core, app) = setup_test_app();

        let (status, _) = send(&app, "POST", "/api/session/focus", Some(json!({"id": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "PATCH", "/api/projects/nope", Some(json!({"name": "n"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "POST", "/api/projects", Some(json!({"name": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "GET", "/api/tasks", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        open_album(&app).await;
        let (status, bytes) =
            send(&app, "POST", "/api/session/focus", Some(json!({"id": "ghost"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: ApiResponse<()> = serde_json::from_slice(&bytes).unwrap();
        assert!(!body.success);
        assert!(body.error.unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_generate_endpoint() {
        let (_core, app) = setup_test_app();
        let generated: GenerateResponse = request_json(
            &app,
            "POST",
            "/api/generate",
            Some(json!({"taskTitle": "Record piano"})),
        )
        .await;
        assert_eq!(generated.tasks.len(), 2);

        let (status, _) = send(&app, "POST", "/api/generate", Some(json!({"taskTitle": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let offline = router(Core::new(
            Arc::new(MemoryStore::new()),
            Arc::new(CannedGenerator::unavailable("no key")),
        ));
        let (status, _) = send(&offline, "POST", "/api/generate", Some(json!({"taskTitle": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_task_rows_and_batch() {
        let (_core, app) = setup_test_app();
        let project = open_album(&app).await;

        let row: crate::models::FlatRow = request_json(
            &app,
            "POST",
            "/api/tasks",
            Some(json!({"projectId": project.id, "title": "Mix", "estimate": 40})),
        )
        .await;
        let rows: Vec<crate::models::FlatRow> =
            request_json(&app, "GET", &format!("/api/tasks?projectId={}", project.id), None).await;
        assert_eq!(rows, vec![row.clone()]);

        // storage edits are reflected in the open tree
        let view: SessionView = request_json(&app, "GET", "/api/session", None).await;
        assert_eq!(view.tree.children()[0].title(), "Mix");

        let report: crate::models::ReorderReport = request_json(
            &app,
            "PATCH",
            "/api/batch",
            Some(json!({"projects": [{"id": project.id, "sortOrder": 2}, {"id": "ghost", "sortOrder": 1}]})),
        )
        .await;
        assert_eq!(report.applied, 1);
        assert_eq!(report.failed.len(), 1);
    }

    #[tokio::test]
    async fn test_ui_escapes_titles() {
        let (_core, app) = setup_test_app();
        open_album(&app).await;
        let _: SessionView = request_json(
            &app,
            "POST",
            "/api/session/tasks",
            Some(json!({"parentId": "root", "title": "<script>x</script>", "estimate": 5})),
        )
        .await;

        let (status, bytes) = send(&app, "GET", "/ui", None).await;
        assert_eq!(status, StatusCode::OK);
        let html = String::from_utf8(bytes).unwrap();
        assert!(html.contains("&lt;script&gt;x&lt;/script&gt;"));
        assert!(html.contains("Album"));
    }
}
