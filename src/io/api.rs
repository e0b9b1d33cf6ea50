//! The persistence API port and its HTTP adapter.

use std::future::Future;
use std::pin::Pin;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::model::config::ServerConfig;
use crate::model::task::Task;
use crate::sync::intent::{ApiRequest, PersistCall};

/// Boxed future returned by [`TodoApi`] methods, keeping the trait
/// dyn-compatible.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Error type for persistence calls
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("not authorized (status {0})")]
    Unauthorized(u16),
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }
}

/// Server-side persistence for tasks.
pub trait TodoApi: Send + Sync {
    /// Issue one persistence call. Creates resolve to the stored task; other
    /// calls resolve to whatever task the server echoes back, if any.
    fn send(&self, call: &PersistCall) -> ApiFuture<'_, Option<Task>>;

    /// `GET /todos`
    fn fetch_active(&self) -> ApiFuture<'_, Vec<Task>>;

    /// `GET /todos/completed?page=N`, 1-based; an empty page ends the list
    fn fetch_completed(&self, page: u32) -> ApiFuture<'_, Vec<Task>>;

    /// `GET /todos/bin`
    fn fetch_bin(&self) -> ApiFuture<'_, Vec<Task>>;
}

// ---------------------------------------------------------------------------
// HTTP adapter
// ---------------------------------------------------------------------------

/// [`TodoApi`] over HTTP with a bearer token.
pub struct HttpTodoApi {
    client: Client,
    server: ServerConfig,
    token: Option<String>,
}

/// List endpoints answer either with a bare array or wrapped in `data`.
#[derive(Deserialize)]
#[serde(untagged)]
enum TaskPage {
    Bare(Vec<Task>),
    Wrapped { data: Vec<Task> },
}

impl TaskPage {
    fn into_tasks(self) -> Vec<Task> {
        match self {
            TaskPage::Bare(tasks) | TaskPage::Wrapped { data: tasks } => tasks,
        }
    }
}

impl HttpTodoApi {
    pub fn new(server: ServerConfig, token: Option<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(server.request_timeout())
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(HttpTodoApi {
            client,
            server,
            token,
        })
    }

    async fn execute(&self, request: &ApiRequest) -> Result<String, ApiError> {
        let url = self.server.url(&request.path);
        debug!(method = %request.method, %url, "api request");
        let mut builder = self.client.request(request.method.clone(), &url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        check_status(status, text)
    }

    async fn get<T: DeserializeOwned>(&self, path: String) -> Result<T, ApiError> {
        let request = ApiRequest {
            method: reqwest::Method::GET,
            path,
            body: None,
        };
        let text = self.execute(&request).await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn check_status(status: StatusCode, text: String) -> Result<String, ApiError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ApiError::Unauthorized(status.as_u16()));
    }
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            message: error_message(&text),
        });
    }
    Ok(text)
}

/// Pull `message` out of a JSON error body, falling back to the raw text.
fn error_message(text: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }
    serde_json::from_str::<ErrorBody>(text)
        .map(|b| b.message)
        .unwrap_or_else(|_| text.trim().to_string())
}

/// Read the task a mutation echoes back. Bodies that are empty or not a
/// task (e.g. `{"success": true}`) yield `None`.
fn echoed_task(text: &str) -> Option<Task> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Echo {
        Bare(Task),
        Wrapped { data: Task },
    }
    match serde_json::from_str::<Echo>(text).ok()? {
        Echo::Bare(task) | Echo::Wrapped { data: task } => Some(task),
    }
}

impl TodoApi for HttpTodoApi {
    fn send(&self, call: &PersistCall) -> ApiFuture<'_, Option<Task>> {
        let requests = call.requests();
        let is_create = matches!(call, PersistCall::Create { .. });
        Box::pin(async move {
            let mut last = None;
            for request in &requests {
                let text = self.execute(request).await?;
                last = echoed_task(&text);
            }
            if is_create && last.is_none() {
                return Err(ApiError::Decode("create returned no task".to_string()));
            }
            Ok(last)
        })
    }

    fn fetch_active(&self) -> ApiFuture<'_, Vec<Task>> {
        Box::pin(async move {
            let page: TaskPage = self.get("/todos".to_string()).await?;
            Ok(page.into_tasks())
        })
    }

    fn fetch_completed(&self, page: u32) -> ApiFuture<'_, Vec<Task>> {
        Box::pin(async move {
            let page: TaskPage = self.get(format!("/todos/completed?page={page}")).await?;
            Ok(page.into_tasks())
        })
    }

    fn fetch_bin(&self) -> ApiFuture<'_, Vec<Task>> {
        Box::pin(async move {
            let page: TaskPage = self.get("/todos/bin".to_string()).await?;
            Ok(page.into_tasks())
        })
    }
}
