//! Tracking service connection settings.

use gauge_core::{MetricsError, MetricsResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TRACKING_URL: &str = "http://localhost:8080";

/// Connection settings for [`HttpTrackingClient`](crate::HttpTrackingClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token; authentication fails without one.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout. `None` waits indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_base_url() -> String {
    DEFAULT_TRACKING_URL.to_string()
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self { base_url: default_base_url(), api_key: None, timeout_secs: None }
    }
}

impl TrackingConfig {
    /// Read `GAUGE_TRACKING_URL`, `GAUGE_API_KEY` and `GAUGE_TRACKING_TIMEOUT`.
    pub fn from_env() -> MetricsResult<Self> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("GAUGE_TRACKING_URL") {
            config.base_url = url;
        }
        if let Ok(key) = std::env::var("GAUGE_API_KEY") {
            if !key.trim().is_empty() {
                config.api_key = Some(key);
            }
        }
        if let Ok(raw) = std::env::var("GAUGE_TRACKING_TIMEOUT") {
            let secs = raw.trim().parse::<u64>().map_err(|_| {
                MetricsError::InvalidConfig(format!("GAUGE_TRACKING_TIMEOUT must be whole seconds, got {raw:?}"))
            })?;
            config.timeout_secs = Some(secs);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MetricsResult<()> {
        let url = self.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(MetricsError::InvalidConfig(format!(
                "tracking url must start with http:// or https://, got {url:?}"
            )));
        }
        if self.timeout_secs == Some(0) {
            return Err(MetricsError::InvalidConfig("tracking timeout must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Base URL without a trailing slash.
    pub fn endpoint(&self) -> &str {
        self.base_url.trim().trim_end_matches('/')
    }
}
