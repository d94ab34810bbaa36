use std::time::Duration;

use crate::errors::SyncError;
use crate::model::{ExportFormat, JobId};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_POLL_MS: u64 = 1_200;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Configuration for talking to the minutes backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the backend API.
    pub base_url: String,
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Total timeout for status and result requests.
    ///
    /// Not applied to the summary stream, which may legitimately run longer.
    pub request_timeout: Duration,
    /// Connect timeout for every request, including the summary stream.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

impl ClientConfig {
    /// Creates a config with default timings for `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Builds a config from the process environment.
    ///
    /// - `MINUTES_API_BASE_URL` (default `http://localhost:8000`)
    /// - `MINUTES_POLL_MS` (default `1200`)
    /// - `MINUTES_REQUEST_TIMEOUT_MS` (default `30000`)
    /// - `MINUTES_CONNECT_TIMEOUT_MS` (default `10000`)
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SyncError> {
        let mut config = Self::default();
        if let Some(base_url) = lookup("MINUTES_API_BASE_URL").filter(|v| !v.trim().is_empty()) {
            config.base_url = base_url.trim().to_string();
        }
        if let Some(ms) = read_millis(&lookup, "MINUTES_POLL_MS")? {
            config.poll_interval = ms;
        }
        if let Some(ms) = read_millis(&lookup, "MINUTES_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = ms;
        }
        if let Some(ms) = read_millis(&lookup, "MINUTES_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout = ms;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides the API base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the status/result request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.base_url.trim().is_empty() {
            return Err(SyncError::Config("base_url must not be empty".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(SyncError::Config("poll interval must be greater than 0".into()));
        }
        if self.request_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(SyncError::Config("timeouts must be greater than 0".into()));
        }
        Ok(())
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    /// Download link for a finished job's export.
    pub fn export_url(&self, job_id: &JobId, format: ExportFormat) -> String {
        self.endpoint(&format!("export/{job_id}.{}", format.extension()))
    }
}

fn read_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>, SyncError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let ms: u64 = raw
        .trim()
        .parse()
        .map_err(|e| SyncError::Config(format!("{key} must be a whole number of milliseconds: {e}")))?;
    Ok(Some(Duration::from_millis(ms)))
}
