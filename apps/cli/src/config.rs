//! Configuration file support for the `gauge` binary.
//!
//! Precedence, highest first:
//! 1. CLI arguments (handled by clap)
//! 2. Local config file (./.gaugerc)
//! 3. Global config file (~/.gauge/config.toml)
//! 4. Defaults

use gauge_core::{CaptureMode, Precision};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GaugeConfig {
    #[serde(default)]
    pub progress: ProgressConfig,

    #[serde(default)]
    pub tracking: TrackingSection,

    #[serde(default)]
    pub log_level: Option<String>,
}

/// Where and how progress lines are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Format spec, e.g. `{:.5f}` or `{:.3e}`
    #[serde(default)]
    pub precision: Option<Precision>,

    /// Durable log file that receives every progress line
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Force the console sink to erase lines in place (or not)
    #[serde(default)]
    pub interactive: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingSection {
    #[serde(default)]
    pub enabled: Option<bool>,

    /// Tracking service URL (overrides GAUGE_TRACKING_URL)
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub project: Option<String>,

    #[serde(default)]
    pub run_name: Option<String>,

    #[serde(default)]
    pub tags: Option<Vec<String>>,

    #[serde(default)]
    pub watch: Option<bool>,

    #[serde(default)]
    pub watch_frequency: Option<u32>,

    #[serde(default)]
    pub capture: Option<CaptureMode>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl GaugeConfig {
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".gauge")
            .join("config.toml")
    }

    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".gaugerc")
    }

    /// Load the global config, then overlay the local one.
    ///
    /// Missing files are skipped. A file that exists but does not parse is an error.
    pub fn discover_and_load() -> ConfigResult<Self> {
        let mut config = Self::default();
        for path in [Self::default_global_path(), Self::default_local_path()] {
            match Self::load_from_file(&path) {
                Ok(found) => config.merge(&found),
                Err(ConfigError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(config)
    }

    /// Values set in `other` override values in `self`.
    pub fn merge(&mut self, other: &Self) {
        if other.log_level.is_some() {
            self.log_level.clone_from(&other.log_level);
        }

        let progress = &other.progress;
        if progress.precision.is_some() {
            self.progress.precision = progress.precision;
        }
        if progress.log_file.is_some() {
            self.progress.log_file.clone_from(&progress.log_file);
        }
        if progress.interactive.is_some() {
            self.progress.interactive = progress.interactive;
        }

        let tracking = &other.tracking;
        if tracking.enabled.is_some() {
            self.tracking.enabled = tracking.enabled;
        }
        if tracking.url.is_some() {
            self.tracking.url.clone_from(&tracking.url);
        }
        if tracking.project.is_some() {
            self.tracking.project.clone_from(&tracking.project);
        }
        if tracking.run_name.is_some() {
            self.tracking.run_name.clone_from(&tracking.run_name);
        }
        if tracking.tags.is_some() {
            self.tracking.tags.clone_from(&tracking.tags);
        }
        if tracking.watch.is_some() {
            self.tracking.watch = tracking.watch;
        }
        if tracking.watch_frequency.is_some() {
            self.tracking.watch_frequency = tracking.watch_frequency;
        }
        if tracking.capture.is_some() {
            self.tracking.capture = tracking.capture;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = GaugeConfig::default();
        assert!(config.progress.precision.is_none());
        assert!(config.tracking.enabled.is_none());
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
log_level = "debug"

[progress]
precision = "{:.3e}"
log_file = "train.log"

[tracking]
enabled = true
project = "scenes"
tags = ["baseline", "ade20k"]
watch_frequency = 50
capture = "gradients"
"#,
        )
        .unwrap();

        let config = GaugeConfig::load_from_file(&path).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.progress.precision, Some(Precision::Scientific(3)));
        assert_eq!(config.progress.log_file, Some(PathBuf::from("train.log")));
        assert_eq!(config.tracking.enabled, Some(true));
        assert_eq!(config.tracking.tags, Some(vec!["baseline".to_string(), "ade20k".to_string()]));
        assert_eq!(config.tracking.watch_frequency, Some(50));
        assert_eq!(config.tracking.capture, Some(CaptureMode::Gradients));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = GaugeConfig::load_from_file(Path::new("/nonexistent/.gaugerc"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_invalid_precision_is_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".gaugerc");
        std::fs::write(&path, "[progress]\nprecision = \"five\"\n").unwrap();
        assert!(matches!(GaugeConfig::load_from_file(&path), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_merge_overlays_set_values() {
        let mut base = GaugeConfig::default();
        base.progress.precision = Some(Precision::Fixed(2));
        base.tracking.project = Some("global".to_string());
        base.tracking.watch = Some(true);

        let mut local = GaugeConfig::default();
        local.tracking.project = Some("local".to_string());
        local.log_level = Some("warn".to_string());

        base.merge(&local);
        assert_eq!(base.progress.precision, Some(Precision::Fixed(2)));
        assert_eq!(base.tracking.project.as_deref(), Some("local"));
        assert_eq!(base.tracking.watch, Some(true));
        assert_eq!(base.log_level.as_deref(), Some("warn"));
    }
}
