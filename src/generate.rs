//! Subtask generation
//!
//! The generator is an external text-completion service. It is asked to break
//! a task into timed steps and its reply is treated as untrusted: code fences
//! are stripped, both `{"tasks": [...]}` and bare arrays are accepted, and any
//! item without a usable title and estimate is dropped before it can become a
//! [`ProposedSubtask`].

use std::sync::Arc;

use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ProposedSubtask;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-exp";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// One validated step proposed by the generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedSubtask {
    pub title: String,
    pub estimate: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("Task title is required")]
    MissingTitle,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generator API error: {0}")]
    Api(String),

    #[error("Malformed generator reply: {0}")]
    Malformed(String),

    #[error("Subtask generation unavailable: {0}")]
    Unavailable(String),
}

/// Something that can propose subtasks for a task
#[async_trait::async_trait]
pub trait SubtaskGenerator: Send + Sync {
    async fn generate(
        &self,
        task_title: &str,
        context: &str,
    ) -> Result<Vec<GeneratedSubtask>, GenerateError>;
}

/// Prompt sent to the completion service
pub fn build_prompt(task_title: &str, context: &str) -> String {
    let context = if context.trim().is_empty() {
        "General task"
    } else {
        context
    };
    format!(
        r#"You are an expert project manager.
Break down the task "{task_title}" into 3-5 actionable, concrete subtasks.
Context: {context}

Rules:
1. Each subtask must have a time estimate in minutes (integer).
2. Total time should be roughly realistic.
3. Return ONLY raw JSON (do not use markdown blocks like ```json).

Example Output:
{{
  "tasks": [
    {{ "title": "Subtask name", "estimate": 15 }},
    {{ "title": "Another step", "estimate": 10 }}
  ]
}}"#
    )
}

/// Removes markdown code fences the model adds despite being asked not to
pub fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

/// Parses and validates a raw generator reply.
///
/// A reply that is not JSON or has neither accepted shape is an error, so the
/// caller applies nothing. Individual bad items are dropped.
pub fn parse_generated(raw: &str) -> Result<Vec<GeneratedSubtask>, GenerateError> {
    let cleaned = strip_code_fences(raw);
    let parsed: Value = serde_json::from_str(&cleaned)
        .map_err(|e| GenerateError::Malformed(format!("not JSON: {}", e)))?;

    let items = match &parsed {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("tasks") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(GenerateError::Malformed(
                    "expected a \"tasks\" array".to_string(),
                ))
            }
        },
        _ => {
            return Err(GenerateError::Malformed(
                "expected an object or an array".to_string(),
            ))
        }
    };

    Ok(items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let subtask = validate_item(item);
            if subtask.is_none() {
                tracing::warn!(index = i, item = %item, "dropping malformed proposed subtask");
            }
            subtask
        })
        .collect())
}

fn validate_item(item: &Value) -> Option<GeneratedSubtask> {
    let title = item.get("title")?.as_str()?.trim();
    if title.is_empty() {
        return None;
    }
    let estimate = coerce_estimate(item.get("estimate")?)?;
    Some(GeneratedSubtask {
        title: title.to_string(),
        estimate,
    })
}

/// Accepts non-negative integers, whole-valued floats, and numeric strings
fn coerce_estimate(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => {
            if let Some(whole) = n.as_u64() {
                return u32::try_from(whole).ok();
            }
            let float = n.as_f64()?;
            let in_range = float.is_finite() && float >= 0.0 && float <= f64::from(u32::MAX);
            (in_range && float.fract() == 0.0).then_some(float as u32)
        }
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

/// Turns generated steps into selectable proposals with `gen-{stamp}-{i}` tokens
pub fn into_proposals(generated: Vec<GeneratedSubtask>, stamp_millis: i64) -> Vec<ProposedSubtask> {
    generated
        .into_iter()
        .enumerate()
        .map(|(i, g)| ProposedSubtask::new(format!("gen-{}-{}", stamp_millis, i), g.title, g.estimate))
        .collect()
}

/// Configuration for the Gemini `generateContent` endpoint
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl GeminiConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
        }
    }
}

/// Generator backed by Google's Gemini API
#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    http_client: Arc<ReqwestClient>,
    config: GeminiConfig,
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

impl GeminiGenerator {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            http_client: Arc::new(ReqwestClient::new()),
            config,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

/// Pulls the first candidate's text out of a `generateContent` reply
fn reply_text(body: &Value) -> Result<String, GenerateError> {
    if let Some(message) = body.pointer("/error/message").and_then(Value::as_str) {
        return Err(GenerateError::Api(message.to_string()));
    }
    let parts = body
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| GenerateError::Malformed("reply has no candidates".to_string()))?;
    Ok(parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(""))
}

#[async_trait::async_trait]
impl SubtaskGenerator for GeminiGenerator {
    async fn generate(
        &self,
        task_title: &str,
        context: &str,
    ) -> Result<Vec<GeneratedSubtask>, GenerateError> {
        if task_title.trim().is_empty() {
            return Err(GenerateError::MissingTitle);
        }
        let prompt = build_prompt(task_title, context);
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: &prompt }],
            }],
        };

        let response = self
            .http_client
            .post(self.url())
            .query(&[("key", self.config.api_key.as_str())])
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("status {}", status));
            return Err(GenerateError::Api(message));
        }

        let text = reply_text(&body)?;
        tracing::debug!(reply = %text, "raw generator reply");
        parse_generated(&text)
    }
}

/// Generator with a fixed reply, used offline and in tests
#[derive(Debug, Clone)]
pub struct CannedGenerator {
    reply: Result<String, String>,
}

impl CannedGenerator {
    /// Every request gets `raw` as the model's reply text
    pub fn replying(raw: impl Into<String>) -> Self {
        Self {
            reply: Ok(raw.into()),
        }
    }

    /// Every request fails, e.g. when no API key is configured
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            reply: Err(reason.into()),
        }
    }
}

#[async_trait::async_trait]
impl SubtaskGenerator for CannedGenerator {
    async fn generate(
        &self,
        task_title: &str,
        _context: &str,
    ) -> Result<Vec<GeneratedSubtask>, GenerateError> {
        if task_title.trim().is_empty() {
            return Err(GenerateError::MissingTitle);
        }
        match &self.reply {
            Ok(raw) => parse_generated(raw),
            Err(reason) => Err(GenerateError::Unavailable(reason.clone())),
        }
    }
}
