//! Remote-tracking extension point.
//!
//! A [`TelemetrySink`] is attached to a [`MetricsRegistry`](crate::MetricsRegistry)
//! next to the plain output sinks. The registry runs its own flush logic and
//! then hands each telemetry sink the progress update; on reset it hands over a
//! [`PhaseSummary`] *before* discarding local state, so a failed publish leaves
//! the accumulators intact.
//!
//! Implementations talk to a remote service and may block the caller on network
//! I/O. No deadline is applied here; wrap calls externally if one is needed.

use crate::error::MetricsResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Serialized run configuration recorded with a remote run.
pub type RunConfig = serde_json::Map<String, serde_json::Value>;

/// Training or validation, derived from the sign of the epoch passed to a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Training,
    Validation,
}

impl Phase {
    /// Negative epochs mark validation passes.
    pub fn from_epoch(epoch: i64) -> Self {
        if epoch < 0 { Self::Validation } else { Self::Training }
    }

    /// Key prefix for phase summaries.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Training => "train_",
            Self::Validation => "val_",
        }
    }
}

/// What a watched model reports on each sampling tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    Gradients,
    #[default]
    Parameters,
}

impl CaptureMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gradients => "gradients",
            Self::Parameters => "parameters",
        }
    }
}

/// Opaque model handle that can be sampled while a run is being watched.
pub trait Watchable: Send {
    fn name(&self) -> &str;

    /// Named tensors flattened to scalars, e.g. `("encoder.weight", [...])`.
    fn sample(&self, mode: CaptureMode) -> Vec<(String, Vec<f64>)>;
}

/// Options for opening a remote run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    pub project: String,
    /// Empty means "let the backend pick a name".
    pub run_name: String,
    pub watch: bool,
    /// Sample the watched model every `watch_frequency` flushes.
    pub watch_frequency: u32,
    pub watch_capture_mode: CaptureMode,
    pub tags: Vec<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            project: "experiment".to_string(),
            run_name: String::new(),
            watch: false,
            watch_frequency: 10,
            watch_capture_mode: CaptureMode::Parameters,
            tags: Vec::new(),
        }
    }
}

/// One flush as seen by telemetry sinks, after the line went to every output sink.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate<'a> {
    pub epoch: i64,
    pub batch: u64,
    pub line: &'a str,
}

/// Means of the current phase, captured just before a reset.
///
/// Only accumulators with at least one record appear in `metrics`; `loss` is
/// `None` when no loss was recorded in the phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseSummary {
    pub metrics: Vec<(String, f64)>,
    pub loss: Option<f64>,
}

pub trait TelemetrySink: Send {
    /// Authenticate, open the run and optionally start watching `model`.
    fn initialize(
        &mut self,
        run_config: RunConfig,
        model: Option<Box<dyn Watchable>>,
        options: RunOptions,
    ) -> MetricsResult<()>;

    /// `Ok` only while the run is open.
    fn ensure_active(&self) -> MetricsResult<()>;

    fn on_progress(&mut self, update: &ProgressUpdate<'_>) -> MetricsResult<()>;

    /// Publish the phase summary as one remote write.
    fn publish_summary(&mut self, summary: &PhaseSummary) -> MetricsResult<()>;

    /// Publish the mapping verbatim; an empty mapping is a no-op.
    fn log_custom_metrics(&mut self, values: &BTreeMap<String, f64>) -> MetricsResult<()>;

    fn log_scalar(&mut self, name: &str, value: f64) -> MetricsResult<()>;

    fn log_distribution(&mut self, name: &str, values: &[f64]) -> MetricsResult<()>;

    /// Close the run. Every later call fails with `BackendFinished`.
    fn finish(&mut self) -> MetricsResult<()>;
}
