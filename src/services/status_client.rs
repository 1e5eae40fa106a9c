//! Catalog task API client
//!
//! Thin request/response wrapper over the catalog pipeline's task endpoints.
//! Nothing here retries; the poll loop owns retry policy.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use crate::models::fleet::{ActiveTask, CatalogHealth, CatalogStats};
use crate::models::job::{JobKind, ScrapeParams};
use crate::models::outcome::TaskOutcome;
use crate::models::status::{Progress, ResultSummary, StatusRecord, TaskState};

/// Remote operations the job lifecycle depends on.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Start a job and return the backend-assigned id.
    async fn submit(&self, kind: &JobKind) -> Result<String, ClientError>;

    async fn get_status(&self, task_id: &str) -> Result<StatusRecord, ClientError>;

    /// Only valid once a Success status has been observed.
    async fn get_result(&self, task_id: &str) -> Result<TaskOutcome, ClientError>;

    /// Best effort; already finished jobs are a no-op.
    async fn cancel(&self, task_id: &str) -> Result<(), ClientError>;

    async fn list_active(&self) -> Result<Vec<ActiveTask>, ClientError>;

    async fn get_stats(&self) -> Result<CatalogStats, ClientError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Job rejected by the backend: {0}")]
    Submission(String),

    #[error("Job {0} is unknown to the backend")]
    NotFound(String),

    #[error("Result for job {task_id} is not ready yet (status: {status})")]
    NotReady { task_id: String, status: String },

    #[error("Catalog API unreachable: {0}")]
    Transport(String),
}

impl ClientError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

#[derive(Deserialize)]
struct SubmitResponse {
    task_id: String,
}

/// Wire shape of `GET /catalog/tasks/{id}/status`.
#[derive(Deserialize)]
struct StatusPayload {
    #[serde(alias = "status")]
    state: String,
    #[serde(default)]
    current: Option<f64>,
    #[serde(default)]
    total: Option<f64>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    meta: Option<serde_json::Value>,
    #[serde(default)]
    traceback: Option<String>,
}

impl StatusPayload {
    fn into_record(self) -> Result<StatusRecord, ClientError> {
        let state = TaskState::from_str(&self.state)
            .map_err(|_| ClientError::Transport(format!("unknown task state {:?}", self.state)))?;

        let phase = self
            .meta
            .as_ref()
            .and_then(|m| m.get("status"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);

        let mut record = StatusRecord::new(state);
        match state {
            TaskState::Progress => {
                let percent = self
                    .meta
                    .as_ref()
                    .and_then(|m| m.get("progress"))
                    .and_then(serde_json::Value::as_f64)
                    .or_else(|| match (self.current, self.total) {
                        (Some(current), Some(total)) if total > 0.0 => {
                            Some(current / total * 100.0)
                        }
                        _ => None,
                    })
                    .map(|p| p.clamp(0.0, 100.0).round() as u8);
                record.progress = Some(Progress { percent, phase });
            }
            TaskState::Success => {
                record.result_summary = self
                    .result
                    .as_ref()
                    .or(self.meta.as_ref())
                    .and_then(ResultSummary::from_value);
            }
            TaskState::Failure => {
                record.error_detail = self.error.or(self.traceback).or(phase);
            }
            _ => {}
        }
        Ok(record)
    }
}

/// Wire shape of `GET /catalog/tasks/{id}/result`.
#[derive(Deserialize)]
struct ResultPayload {
    status: String,
    #[serde(default)]
    result: Option<TaskOutcome>,
}

/// HTTP client for the catalog management API.
pub struct HttpStatusClient {
    http: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpStatusClient {
    /// `base_url` is the API root, e.g. `http://localhost:8000/api/v1`.
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = Client::builder()
            .user_agent(concat!("catalog-jobs/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/catalog{}", self.base_url, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Check worker and queue availability. Reports an unhealthy body too.
    pub async fn health(&self) -> Result<CatalogHealth, ClientError> {
        let response = self
            .authorized(self.http.get(self.url("/health")))
            .send()
            .await?;
        Ok(response.json().await?)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self
            .authorized(self.http.get(self.url(path)))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ClientError::Transport(format!(
                "{} returned HTTP {}: {}",
                path,
                status,
                error_detail(response).await
            )));
        }
        Ok(response.json().await?)
    }
}

fn scrape_query(params: &ScrapeParams) -> [(&'static str, String); 3] {
    [
        ("query", params.query.clone()),
        ("limit", params.limit.to_string()),
        ("domain", params.domain.to_string()),
    ]
}

/// Pull a readable message out of a FastAPI-style error body.
async fn error_detail(response: Response) -> String {
    const MAX_DETAIL: usize = 200;

    let text = response.text().await.unwrap_or_default();
    let detail = match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(body) => match body.get("detail") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => text,
        },
        Err(_) => text,
    };
    detail.chars().take(MAX_DETAIL).collect()
}

#[async_trait]
impl TaskBackend for HttpStatusClient {
    async fn submit(&self, kind: &JobKind) -> Result<String, ClientError> {
        let request = match kind {
            JobKind::FullImport(params) => self.http.post(self.url("/parse")).json(params),
            JobKind::PreviewOnly(params) => self
                .http
                .post(self.url("/parse-simple"))
                .query(&scrape_query(params)),
            JobKind::SmokeChain => self.http.post(self.url("/test-chain")),
            JobKind::SmokeParser(params) => self
                .http
                .post(self.url("/test-parser"))
                .query(&scrape_query(params)),
        };

        let response = self.authorized(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = error_detail(response).await;
            return Err(ClientError::Submission(format!("HTTP {}: {}", status, detail)));
        }

        let body: SubmitResponse = response.json().await?;
        Ok(body.task_id)
    }

    async fn get_status(&self, task_id: &str) -> Result<StatusRecord, ClientError> {
        let response = self
            .authorized(self.http.get(self.url(&format!("/tasks/{}/status", task_id))))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(task_id.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(ClientError::Transport(format!(
                "status check returned HTTP {}: {}",
                status,
                error_detail(response).await
            )));
        }

        let payload: StatusPayload = response.json().await?;
        payload.into_record()
    }

    async fn get_result(&self, task_id: &str) -> Result<TaskOutcome, ClientError> {
        let response = self
            .authorized(self.http.get(self.url(&format!("/tasks/{}/result", task_id))))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(task_id.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(ClientError::Transport(format!(
                "result fetch returned HTTP {}: {}",
                status,
                error_detail(response).await
            )));
        }

        let payload: ResultPayload = response.json().await?;
        if !payload.status.eq_ignore_ascii_case("success") {
            return Err(ClientError::NotReady {
                task_id: task_id.to_string(),
                status: payload.status,
            });
        }

        payload
            .result
            .map(TaskOutcome::normalized)
            .ok_or_else(|| ClientError::Transport("success payload carried no result".to_string()))
    }

    async fn cancel(&self, task_id: &str) -> Result<(), ClientError> {
        let response = self
            .authorized(self.http.delete(self.url(&format!("/tasks/{}", task_id))))
            .send()
            .await?;

        // Revoking an unknown or long-finished task is a no-op.
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        let status = response.status();
        Err(ClientError::Transport(format!(
            "cancel returned HTTP {}: {}",
            status,
            error_detail(response).await
        )))
    }

    async fn list_active(&self) -> Result<Vec<ActiveTask>, ClientError> {
        self.get_json("/tasks").await
    }

    async fn get_stats(&self) -> Result<CatalogStats, ClientError> {
        self.get_json("/stats").await
    }
}
