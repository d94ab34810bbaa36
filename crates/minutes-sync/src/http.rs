//! `reqwest` implementation of the collaborator traits against the minutes backend.

use futures::StreamExt as _;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api::{ByteStream, JobApi, SummaryStreamSource};
use crate::config::ClientConfig;
use crate::errors::{ApiError, SyncError};
use crate::model::{JobId, MeetingResult, StatusResponse};

/// HTTP client for `/status`, `/result` and `/summary/stream`.
#[derive(Clone)]
pub struct HttpJobApi {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpJobApi {
    pub fn new(config: ClientConfig) -> Result<Self, SyncError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a client from `MINUTES_*` environment variables.
    pub fn from_env() -> Result<Self, SyncError> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.config.endpoint(path);
        debug!(%url, "GET");
        let response = self
            .client
            .get(&url)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| ApiError::transport(format!("GET {url} failed: {e}")))?;
        let response = ensure_success(response).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::transport(format!("reading {url} failed: {e}")))?;
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::decode(format!("unexpected body from {url}: {e}")))
    }
}

#[async_trait::async_trait]
impl JobApi for HttpJobApi {
    async fn get_status(&self, job_id: &JobId) -> Result<StatusResponse, ApiError> {
        self.get_json(&format!("status/{job_id}")).await
    }

    async fn get_result(&self, job_id: &JobId) -> Result<MeetingResult, ApiError> {
        self.get_json(&format!("result/{job_id}")).await
    }
}

#[async_trait::async_trait]
impl SummaryStreamSource for HttpJobApi {
    async fn open_summary_stream(&self, job_id: &JobId) -> Result<ByteStream, ApiError> {
        let url = self.config.endpoint("summary/stream");
        debug!(%url, %job_id, "opening summary stream");
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&serde_json::json!({ "job_id": job_id }))
            .send()
            .await
            .map_err(|e| ApiError::transport(format!("POST {url} failed: {e}")))?;
        let response = ensure_success(response).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ApiError::transport(e.to_string())));
        Ok(Box::pin(stream))
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(ApiError::http(status.as_u16(), error_message(&body)))
}

/// Extracts `detail.error.message` (or `detail` when it is a string) from an
/// error body, falling back to the raw body.
pub(crate) fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    let detail = value.get("detail");
    detail
        .and_then(|d| d.get("error"))
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .or_else(|| detail.and_then(|d| d.as_str()))
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| body.trim().to_string())
}
