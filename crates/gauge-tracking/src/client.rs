//! Remote tracking protocol: authenticate, open a run, append history, close.

use crate::histogram::Histogram;
use chrono::{DateTime, Utc};
use gauge_core::{CaptureMode, MetricsResult, RunConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A value in one history write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogValue {
    Int(i64),
    Float(f64),
    Histogram(Histogram),
}

impl From<f64> for LogValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for LogValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<Histogram> for LogValue {
    fn from(value: Histogram) -> Self {
        Self::Histogram(value)
    }
}

impl LogValue {
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Histogram(_) => None,
        }
    }
}

pub type LogValues = BTreeMap<String, LogValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub project: String,
    pub name: String,
    pub config: RunConfig,
    pub tags: Vec<String>,
    pub started_at: DateTime<Utc>,
}

/// Identifies an open run on the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchRequest {
    pub model: String,
    pub log_freq: u32,
    pub log: CaptureMode,
}

/// One atomic append to a run's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: u64,
    pub timestamp: DateTime<Utc>,
    pub values: LogValues,
}

/// Transport to a remote experiment-tracking service.
///
/// Every call blocks until the service answers.
pub trait TrackingClient: Send {
    /// # Errors
    /// `MetricsError::Authentication` when the service rejects the credentials.
    fn authenticate(&mut self) -> MetricsResult<()>;

    /// # Errors
    /// `MetricsError::RunCreation` when the run cannot be opened.
    fn open_run(&mut self, request: &RunRequest) -> MetricsResult<RunHandle>;

    fn watch(&mut self, run: &RunHandle, request: &WatchRequest) -> MetricsResult<()>;

    /// # Errors
    /// `MetricsError::Publish` when the write is not acknowledged.
    fn log(&mut self, run: &RunHandle, entry: &HistoryEntry) -> MetricsResult<()>;

    fn finish(&mut self, run: &RunHandle) -> MetricsResult<()>;
}

impl<C: TrackingClient + ?Sized> TrackingClient for Box<C> {
    fn authenticate(&mut self) -> MetricsResult<()> {
        (**self).authenticate()
    }

    fn open_run(&mut self, request: &RunRequest) -> MetricsResult<RunHandle> {
        (**self).open_run(request)
    }

    fn watch(&mut self, run: &RunHandle, request: &WatchRequest) -> MetricsResult<()> {
        (**self).watch(run, request)
    }

    fn log(&mut self, run: &RunHandle, entry: &HistoryEntry) -> MetricsResult<()> {
        (**self).log(run, entry)
    }

    fn finish(&mut self, run: &RunHandle) -> MetricsResult<()> {
        (**self).finish(run)
    }
}
