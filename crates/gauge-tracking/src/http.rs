//! HTTP implementation of the tracking protocol.
//!
//! Endpoints, all `POST` with JSON bodies and bearer authentication:
//! - `/api/v1/auth`
//! - `/api/v1/runs`
//! - `/api/v1/runs/{id}/watch`
//! - `/api/v1/runs/{id}/history`
//! - `/api/v1/runs/{id}/finish`

use crate::client::{HistoryEntry, RunHandle, RunRequest, TrackingClient, WatchRequest};
use crate::config::TrackingConfig;
use gauge_core::{MetricsError, MetricsResult};
use reqwest::blocking::{Client, Response};
use serde::Serialize;
use tracing::{debug, error};

/// Blocking HTTP client for a tracking service.
#[derive(Debug, Clone)]
pub struct HttpTrackingClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpTrackingClient {
    /// # Errors
    /// `MetricsError::InvalidConfig` if the config does not validate or the
    /// HTTP client cannot be built.
    pub fn new(config: &TrackingConfig) -> MetricsResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| MetricsError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { base_url: config.endpoint().to_string(), api_key: config.api_key.clone(), client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response, String> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "tracking request");

        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(|e| {
            error!(error = %e, url = %url, "tracking service unreachable");
            if e.is_connect() {
                format!("tracking service not reachable at {}", self.base_url)
            } else if e.is_timeout() {
                format!("request to {url} timed out")
            } else {
                format!("network error: {e}")
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_else(|_| "<no body>".to_string());
        error!(status = %status, url = %url, body = %body, "tracking service returned error status");
        Err(format!("{url} returned {status}: {body}"))
    }

    fn run_path(run: &RunHandle, action: &str) -> String {
        format!("/api/v1/runs/{}/{action}", run.id)
    }
}

impl TrackingClient for HttpTrackingClient {
    fn authenticate(&mut self) -> MetricsResult<()> {
        if self.api_key.is_none() {
            return Err(MetricsError::Authentication("no API key configured (set GAUGE_API_KEY)".to_string()));
        }
        self.post("/api/v1/auth", &serde_json::json!({})).map_err(MetricsError::Authentication)?;
        Ok(())
    }

    fn open_run(&mut self, request: &RunRequest) -> MetricsResult<RunHandle> {
        let response = self.post("/api/v1/runs", request).map_err(MetricsError::RunCreation)?;
        let mut handle: RunHandle = response
            .json()
            .map_err(|e| MetricsError::RunCreation(format!("invalid run response: {e}")))?;
        if handle.name.is_empty() {
            handle.name.clone_from(&request.name);
        }
        Ok(handle)
    }

    fn watch(&mut self, run: &RunHandle, request: &WatchRequest) -> MetricsResult<()> {
        self.post(&Self::run_path(run, "watch"), request).map_err(MetricsError::RunCreation)?;
        Ok(())
    }

    fn log(&mut self, run: &RunHandle, entry: &HistoryEntry) -> MetricsResult<()> {
        self.post(&Self::run_path(run, "history"), entry).map_err(MetricsError::Publish)?;
        Ok(())
    }

    fn finish(&mut self, run: &RunHandle) -> MetricsResult<()> {
        self.post(&Self::run_path(run, "finish"), &serde_json::json!({})).map_err(MetricsError::Publish)?;
        Ok(())
    }
}
