//! Telemetry backend: mirrors registry phases and custom metrics to a remote run.
//!
//! Lifecycle: `Uninitialized --initialize--> Active --finish--> Finished`.
//! A failed `initialize` leaves the backend `Uninitialized` so it can be
//! retried; nothing leaves `Finished`.
//!
//! Every remote call blocks the driving loop until the service answers.

use crate::client::{HistoryEntry, LogValue, LogValues, RunHandle, RunRequest, TrackingClient, WatchRequest};
use crate::histogram::{DEFAULT_BINS, Histogram};
use chrono::Utc;
use gauge_core::{
    MetricsError, MetricsResult, Phase, PhaseSummary, ProgressUpdate, RunConfig, RunOptions, TelemetrySink,
    Watchable,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Uninitialized,
    Active,
    Finished,
}

pub struct TelemetryBackend<C> {
    client: C,
    state: ConnectionState,
    run: Option<RunHandle>,
    run_config: RunConfig,
    options: RunOptions,
    model: Option<Box<dyn Watchable>>,
    phase: Phase,
    epoch: i64,
    batch_count: u64,
    step: u64,
}

impl<C> std::fmt::Debug for TelemetryBackend<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryBackend")
            .field("state", &self.state)
            .field("run", &self.run)
            .field("phase", &self.phase)
            .field("epoch", &self.epoch)
            .field("batch_count", &self.batch_count)
            .finish_non_exhaustive()
    }
}

impl<C: TrackingClient> TelemetryBackend<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            state: ConnectionState::Uninitialized,
            run: None,
            run_config: RunConfig::new(),
            options: RunOptions::default(),
            model: None,
            phase: Phase::Training,
            epoch: 0,
            batch_count: 0,
            step: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Last training epoch seen by a flush.
    pub fn epoch(&self) -> i64 {
        self.epoch
    }

    /// Flushes seen since `initialize`, training and validation alike.
    pub fn batch_count(&self) -> u64 {
        self.batch_count
    }

    pub fn run(&self) -> Option<&RunHandle> {
        self.run.as_ref()
    }

    /// Configuration snapshot recorded with the run.
    pub fn run_config(&self) -> &RunConfig {
        &self.run_config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Serialize `config` into a run configuration mapping.
    ///
    /// # Errors
    /// `MetricsError::InvalidConfig` unless `config` serializes to a JSON object.
    pub fn config_snapshot<T: Serialize>(config: &T) -> MetricsResult<RunConfig> {
        match serde_json::to_value(config)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(MetricsError::InvalidConfig(format!(
                "run config must serialize to a mapping, got {other}"
            ))),
        }
    }

    fn publish(&mut self, values: LogValues) -> MetricsResult<()> {
        let run = self.run.as_ref().ok_or(MetricsError::NotActive)?;
        let entry = HistoryEntry { step: self.step, timestamp: Utc::now(), values };
        if let Err(e) = self.client.log(run, &entry) {
            error!(error = %e, run_id = %run.id, step = self.step, "failed to publish metrics");
            return Err(e);
        }
        self.step += 1;
        Ok(())
    }

    fn sample_watched_model(&mut self) -> MetricsResult<()> {
        let frequency = u64::from(self.options.watch_frequency);
        if !self.options.watch || frequency == 0 || !self.batch_count.is_multiple_of(frequency) {
            return Ok(());
        }
        let Some(model) = &self.model else {
            return Ok(());
        };

        let mode = self.options.watch_capture_mode;
        let mut values = LogValues::new();
        for (name, samples) in model.sample(mode) {
            match Histogram::from_values(&samples, DEFAULT_BINS) {
                Ok(hist) => {
                    values.insert(format!("{}/{name}", mode.as_str()), LogValue::Histogram(hist));
                }
                Err(_) => debug!(tensor = %name, "skipping tensor without finite values"),
            }
        }
        if values.is_empty() {
            return Ok(());
        }
        self.publish(values)
    }
}

impl<C: TrackingClient> TelemetrySink for TelemetryBackend<C> {
    fn initialize(
        &mut self,
        run_config: RunConfig,
        model: Option<Box<dyn Watchable>>,
        options: RunOptions,
    ) -> MetricsResult<()> {
        match self.state {
            ConnectionState::Uninitialized => {}
            ConnectionState::Active => return Err(MetricsError::AlreadyActive),
            ConnectionState::Finished => return Err(MetricsError::BackendFinished),
        }
        if options.watch && model.is_none() {
            return Err(MetricsError::InvalidConfig("watch requested without a model handle".to_string()));
        }
        if options.watch && options.watch_frequency == 0 {
            return Err(MetricsError::InvalidConfig("watch_frequency must be >= 1".to_string()));
        }

        if let Err(e) = self.client.authenticate() {
            error!(error = %e, "tracking authentication failed");
            return Err(e);
        }

        let name = if options.run_name.trim().is_empty() {
            format!("run-{}", &Uuid::new_v4().simple().to_string()[..8])
        } else {
            options.run_name.clone()
        };
        let request = RunRequest {
            project: options.project.clone(),
            name,
            config: run_config.clone(),
            tags: options.tags.clone(),
            started_at: Utc::now(),
        };
        let run = match self.client.open_run(&request) {
            Ok(run) => run,
            Err(e) => {
                error!(error = %e, project = %request.project, "failed to open tracking run");
                return Err(e);
            }
        };

        if options.watch {
            if let Some(model) = &model {
                let watch = WatchRequest {
                    model: model.name().to_string(),
                    log_freq: options.watch_frequency,
                    log: options.watch_capture_mode,
                };
                if let Err(e) = self.client.watch(&run, &watch) {
                    error!(error = %e, run_id = %run.id, "failed to register model watch");
                    // a retry opens a fresh run, so this one must not stay open
                    if let Err(close) = self.client.finish(&run) {
                        error!(error = %close, run_id = %run.id, "failed to close run after watch failure");
                    }
                    return Err(e);
                }
            }
        }

        info!(run_id = %run.id, run_name = %run.name, project = %request.project, "tracking run started");
        self.state = ConnectionState::Active;
        self.run = Some(run);
        self.run_config = run_config;
        self.options = options;
        self.model = model;
        self.phase = Phase::Training;
        self.epoch = 0;
        self.batch_count = 0;
        self.step = 0;
        Ok(())
    }

    fn ensure_active(&self) -> MetricsResult<()> {
        match self.state {
            ConnectionState::Active => Ok(()),
            ConnectionState::Uninitialized => Err(MetricsError::NotActive),
            ConnectionState::Finished => Err(MetricsError::BackendFinished),
        }
    }

    fn on_progress(&mut self, update: &ProgressUpdate<'_>) -> MetricsResult<()> {
        self.ensure_active()?;
        self.phase = Phase::from_epoch(update.epoch);
        if self.phase == Phase::Training {
            self.epoch = update.epoch;
        }
        // counts validation flushes too
        self.batch_count += 1;
        self.sample_watched_model()
    }

    fn publish_summary(&mut self, summary: &PhaseSummary) -> MetricsResult<()> {
        self.ensure_active()?;
        let prefix = self.phase.prefix();

        let mut values: LogValues = summary
            .metrics
            .iter()
            .map(|(name, mean)| (format!("{prefix}{name}"), LogValue::Float(*mean)))
            .collect();
        if let Some(loss) = summary.loss {
            values.insert(format!("{prefix}loss"), LogValue::Float(loss));
        }
        values.insert(format!("{prefix}epoch"), LogValue::Int(self.epoch));
        values.insert(
            "batch_count".to_string(),
            LogValue::Int(i64::try_from(self.batch_count).unwrap_or(i64::MAX)),
        );

        debug!(phase = ?self.phase, keys = values.len(), "publishing phase summary");
        self.publish(values)
    }

    fn log_custom_metrics(&mut self, values: &BTreeMap<String, f64>) -> MetricsResult<()> {
        self.ensure_active()?;
        if values.is_empty() {
            return Ok(());
        }
        self.publish(values.iter().map(|(k, v)| (k.clone(), LogValue::Float(*v))).collect())
    }

    fn log_scalar(&mut self, name: &str, value: f64) -> MetricsResult<()> {
        self.ensure_active()?;
        self.publish(LogValues::from([(name.to_string(), LogValue::Float(value))]))
    }

    fn log_distribution(&mut self, name: &str, values: &[f64]) -> MetricsResult<()> {
        self.ensure_active()?;
        let hist = Histogram::from_values(values, DEFAULT_BINS)?;
        self.publish(LogValues::from([(name.to_string(), LogValue::Histogram(hist))]))
    }

    fn finish(&mut self) -> MetricsResult<()> {
        self.ensure_active()?;
        let run = self.run.as_ref().ok_or(MetricsError::NotActive)?;
        if let Err(e) = self.client.finish(run) {
            error!(error = %e, run_id = %run.id, "failed to finish tracking run");
            return Err(e);
        }
        info!(run_id = %run.id, steps = self.step, batches = self.batch_count, "tracking run finished");
        self.state = ConnectionState::Finished;
        self.model = None;
        Ok(())
    }
}
