use std::time::Duration;

use anyhow::Context;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use workorder_shared::{
    InterfaceSettings, PaginatedResponse, PlannedDateUpdate, TaskAssignRequest, TaskCreate,
    TaskDto, TaskPatch, TaskStatusUpdate, TasksListArgs,
};

use crate::api::{ApiError, TaskBackend};
use crate::config::Config;
use crate::location::encode_component;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// [`TaskBackend`] over the REST API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let base_url = cfg
            .get("api.url")
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let token = cfg
            .get("api.token")
            .or_else(|| std::env::var("WORKORDER_TOKEN").ok())
            .filter(|token| !token.trim().is_empty());
        let timeout = cfg
            .get_u64("api.timeout")?
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        debug!(base_url = %base_url, has_token = token.is_some(), timeout, "configuring HTTP backend");
        Self::new(&base_url, token, Duration::from_secs(timeout))
    }

    #[instrument(skip(self, body), fields(method = %method, path = %path))]
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: Option<String>,
        body: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, ApiError> {
        let mut url = format!("{}{}", self.base_url, path);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(&query);
        }

        let mut request = self
            .client
            .request(method, &url)
            .header(ACCEPT, "application/json");
        if let Some(token) = self.token.as_ref() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;

        if !status.is_success() {
            let detail = error_detail(&bytes);
            warn!(status = status.as_u16(), detail = %detail, "backend rejected request");
            return Err(ApiError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        Ok(bytes.to_vec())
    }

    async fn send_json<B: Serialize>(&self, method: Method, path: &str, body: &B) -> Result<Vec<u8>, ApiError> {
        let payload =
            serde_json::to_vec(body).map_err(|err| ApiError::Decode(err.to_string()))?;
        self.send(method, path, None, Some(payload)).await
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(bytes).map_err(|err| ApiError::Decode(err.to_string()))
}

/// FastAPI-style `{"detail": ...}` bodies carry the useful message.
fn error_detail(bytes: &[u8]) -> String {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => match map.get("detail") {
            Some(Value::String(detail)) => detail.clone(),
            Some(other) => other.to_string(),
            None => Value::Object(map).to_string(),
        },
        _ => String::from_utf8_lossy(bytes).trim().to_string(),
    }
}

pub fn encode_query(pairs: &[(&str, String)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{key}={}", encode_component(value)))
        .collect::<Vec<_>>()
        .join("&")
}

impl TaskBackend for HttpBackend {
    async fn list_tasks(
        &self,
        args: &TasksListArgs,
    ) -> Result<PaginatedResponse<TaskDto>, ApiError> {
        let query = encode_query(&args.query_pairs());
        let bytes = self.send(Method::GET, "/api/tasks", Some(query), None).await?;
        decode(&bytes)
    }

    async fn update_status(&self, id: i64, body: &TaskStatusUpdate) -> Result<(), ApiError> {
        self.send_json(Method::PUT, &format!("/api/tasks/{id}/status"), body)
            .await
            .map(|_| ())
    }

    async fn assign_task(&self, id: i64, body: &TaskAssignRequest) -> Result<(), ApiError> {
        self.send_json(Method::PUT, &format!("/api/tasks/{id}/assign"), body)
            .await
            .map(|_| ())
    }

    async fn update_planned_date(
        &self,
        id: i64,
        body: &PlannedDateUpdate,
    ) -> Result<(), ApiError> {
        self.send_json(Method::PUT, &format!("/api/tasks/{id}/planned-date"), body)
            .await
            .map(|_| ())
    }

    async fn patch_task(&self, id: i64, patch: &TaskPatch) -> Result<(), ApiError> {
        self.send_json(Method::PUT, &format!("/api/admin/tasks/{id}"), patch)
            .await
            .map(|_| ())
    }

    async fn delete_task(&self, id: i64) -> Result<(), ApiError> {
        self.send(Method::DELETE, &format!("/api/tasks/{id}"), None, None)
            .await
            .map(|_| ())
    }

    async fn create_task(&self, body: &TaskCreate) -> Result<(), ApiError> {
        self.send_json(Method::POST, "/api/tasks", body)
            .await
            .map(|_| ())
    }

    async fn interface_settings(&self) -> Result<InterfaceSettings, ApiError> {
        let bytes = self
            .send(Method::GET, "/api/settings/interface", None, None)
            .await?;
        decode(&bytes)
    }
}
