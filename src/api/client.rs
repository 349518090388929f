//! API client module
//!
//! HTTP client for the fractal-focus API server.

use std::sync::Arc;

use reqwest::{Client as ReqwestClient, Error as ReqwestError, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::server::SplitPreview;
use crate::models::{NewProject, Project, ProposedSubtask, SessionView};

/// API client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Generic API response structure
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] ReqwestError),

    #[error("API error: {0}")]
    Api(String),

    #[error("Missing data in response")]
    MissingData,
}

/// API client for the fractal-focus service
#[derive(Debug, Clone)]
pub struct Client {
    http_client: Arc<ReqwestClient>,
    config: ClientConfig,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Create a new client with default configuration
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Create a new client with custom configuration
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            http_client: Arc::new(ReqwestClient::new()),
            config,
        }
    }

    async fn request<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let mut builder = self.http_client.request(method, &url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        let status = response.status();
        let api_response: ApiResponse<T> = response.json().await?;

        if api_response.success {
            api_response.data.ok_or(ClientError::MissingData)
        } else {
            Err(ClientError::Api(api_response.error.unwrap_or_else(|| {
                format!("Unknown API error (status {})", status)
            })))
        }
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path, Some(body)).await
    }

    async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.request::<(), T>(Method::POST, path, None).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.request::<(), T>(Method::GET, path, None).await
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>, ClientError> {
        self.get("/api/projects").await
    }

    pub async fn create_project(&self, new: &NewProject) -> Result<Project, ClientError> {
        self.post("/api/projects", new).await
    }

    pub async fn session(&self) -> Result<SessionView, ClientError> {
        self.get("/api/session").await
    }

    pub async fn open_project(&self, project_id: &str) -> Result<SessionView, ClientError> {
        self.post("/api/session/open", &json!({ "projectId": project_id }))
            .await
    }

    pub async fn toggle(&self, id: &str) -> Result<SessionView, ClientError> {
        self.post("/api/session/toggle", &json!({ "id": id })).await
    }

    pub async fn focus(&self, id: &str) -> Result<SessionView, ClientError> {
        self.post("/api/session/focus", &json!({ "id": id })).await
    }

    pub async fn advance(&self) -> Result<SessionView, ClientError> {
        self.post_empty("/api/session/advance").await
    }

    pub async fn complete_current(&self) -> Result<SessionView, ClientError> {
        self.post_empty("/api/session/complete").await
    }

    pub async fn exit_focus(&self) -> Result<SessionView, ClientError> {
        self.post_empty("/api/session/exit").await
    }

    pub async fn add_task(
        &self,
        parent_id: &str,
        title: &str,
        estimate: Option<u32>,
    ) -> Result<SessionView, ClientError> {
        let body = json!({ "parentId": parent_id, "title": title, "estimate": estimate });
        self.post("/api/session/tasks", &body).await
    }

    pub async fn split_context(&self, id: &str) -> Result<String, ClientError> {
        self.get(&format!("/api/session/context/{}", id)).await
    }

    pub async fn propose_subtasks(&self, id: &str) -> Result<Vec<ProposedSubtask>, ClientError> {
        self.post_empty(&format!("/api/session/propose/{}", id))
            .await
    }

    pub async fn preview_split(
        &self,
        id: &str,
        proposals: &[ProposedSubtask],
    ) -> Result<SplitPreview, ClientError> {
        let body = json!({ "taskId": id, "proposals": proposals });
        self.post("/api/session/preview", &body).await
    }

    pub async fn apply_subtasks(
        &self,
        id: &str,
        proposals: &[ProposedSubtask],
    ) -> Result<SessionView, ClientError> {
        let body = json!({ "taskId": id, "proposals": proposals });
        self.post("/api/session/apply", &body).await
    }
}
