//! The metrics registry and its shared-instance cell.
//!
//! The driving loop fetches accumulators by name every batch, records into
//! them, flushes progress periodically and resets at phase boundaries (end of
//! epoch, switch between training and validation).
//!
//! The registry is driven from one loop; the mutex in [`SharedRegistry`] only
//! exists so a process-wide value can be stored. Concurrent workers should
//! either funnel calls through one owner or keep one [`RegistryCell`] each and
//! combine the results with [`MetricsRegistry::merge_from`].

use crate::aggregate::RunningMean;
use crate::error::{MetricsError, MetricsResult};
use crate::precision::Precision;
use crate::sink::Sink;
use crate::telemetry::{PhaseSummary, ProgressUpdate, TelemetrySink};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, trace};

/// Backspace, used to move the cursor back over an in-place progress line.
const ERASE: char = '\u{8}';

pub struct MetricsRegistry {
    index: HashMap<String, usize>,
    metrics: Vec<(String, RunningMean)>,
    loss: RunningMean,
    sinks: Vec<Box<dyn Sink>>,
    telemetry: Vec<Box<dyn TelemetrySink>>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("metrics", &self.metrics)
            .field("loss", &self.loss)
            .field("sinks", &self.sinks.len())
            .field("telemetry", &self.telemetry.len())
            .finish()
    }
}

impl MetricsRegistry {
    fn empty() -> Self {
        Self {
            index: HashMap::new(),
            metrics: Vec::new(),
            loss: RunningMean::new(),
            sinks: Vec::new(),
            telemetry: Vec::new(),
        }
    }

    /// The process-wide registry, created on first call.
    pub fn instance() -> SharedRegistry {
        GLOBAL.instance()
    }

    /// Explicitly create the process-wide registry (e.g. at startup).
    ///
    /// # Errors
    /// `MetricsError::DuplicateSingleton` if it already exists.
    pub fn create() -> MetricsResult<SharedRegistry> {
        GLOBAL.create()
    }

    /// Sinks are neither bounded nor deduplicated.
    pub fn attach_sink(&mut self, sink: impl Sink + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn attach_telemetry(&mut self, sink: impl TelemetrySink + 'static) {
        self.telemetry.push(Box::new(sink));
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Attached telemetry sinks, in attach order.
    pub fn telemetry_mut(&mut self) -> impl Iterator<Item = &mut (dyn TelemetrySink + 'static)> {
        self.telemetry.iter_mut().map(|t| &mut **t)
    }

    /// Accumulator for `name`, created empty on first reference.
    pub fn metric(&mut self, name: &str) -> &mut RunningMean {
        let slot = match self.index.get(name) {
            Some(&slot) => slot,
            None => {
                self.metrics.push((name.to_string(), RunningMean::new()));
                let slot = self.metrics.len() - 1;
                self.index.insert(name.to_string(), slot);
                slot
            }
        };
        &mut self.metrics[slot].1
    }

    /// Look up an accumulator without creating it.
    pub fn get(&self, name: &str) -> Option<&RunningMean> {
        self.index.get(name).map(|&slot| &self.metrics[slot].1)
    }

    /// Named accumulators in first-reference order.
    pub fn metrics(&self) -> impl Iterator<Item = (&str, &RunningMean)> {
        self.metrics.iter().map(|(name, acc)| (name.as_str(), acc))
    }

    pub fn loss(&self) -> &RunningMean {
        &self.loss
    }

    pub fn record_loss(&mut self, value: f64) {
        self.loss.record(value);
    }

    /// The progress line for the current state, without recording anything.
    ///
    /// Accumulators with no records in this phase are left out.
    pub fn format_progress(&self, epoch: i64, batch: u64, precision: Precision) -> MetricsResult<String> {
        let mut line = format!(
            "epoch: {epoch} - batch: {batch} - loss: {}",
            precision.format(self.loss.mean()?)
        );
        for (name, acc) in self.metrics.iter().filter(|(_, acc)| !acc.is_empty()) {
            let _ = write!(line, " - {name}: {}", precision.format(acc.mean()?));
        }
        Ok(line)
    }

    /// Record `loss`, render the progress line and send it to every sink.
    ///
    /// Interactive sinks get the line followed by as many backspaces as it has
    /// characters, so the next flush overwrites it. Durable sinks get the line
    /// and a newline. Every sink is flushed after its write.
    ///
    /// Telemetry sinks are checked before anything is recorded and notified
    /// after all output sinks were written.
    pub fn flush_progress(
        &mut self,
        epoch: i64,
        batch: u64,
        loss: f64,
        precision: Precision,
    ) -> MetricsResult<String> {
        self.ensure_telemetry_active()?;

        self.loss.record(loss);
        let line = self.format_progress(epoch, batch, precision)?;
        trace!(epoch, batch, "flushing progress line");

        let width = line.chars().count();
        let interactive_text: String =
            line.chars().chain(std::iter::repeat_n(ERASE, width)).collect();
        let durable_text = format!("{line}\n");

        for sink in &mut self.sinks {
            if sink.is_interactive() {
                sink.write(&interactive_text)?;
            } else {
                sink.write(&durable_text)?;
            }
            sink.flush()?;
        }

        let update = ProgressUpdate { epoch, batch, line: &line };
        for telemetry in &mut self.telemetry {
            telemetry.on_progress(&update)?;
        }

        Ok(line)
    }

    /// Means of the current phase (non-empty accumulators only).
    pub fn summary(&self) -> PhaseSummary {
        PhaseSummary {
            metrics: self
                .metrics
                .iter()
                .filter_map(|(name, acc)| acc.mean().ok().map(|mean| (name.clone(), mean)))
                .collect(),
            loss: self.loss.mean().ok(),
        }
    }

    /// End the current phase.
    ///
    /// Telemetry sinks publish the phase summary first. If any publish fails
    /// the error is returned and nothing is cleared. Otherwise every
    /// accumulator is discarded and each interactive sink gets a blank line.
    pub fn reset(&mut self) -> MetricsResult<()> {
        self.ensure_telemetry_active()?;

        if !self.telemetry.is_empty() {
            let summary = self.summary();
            for telemetry in &mut self.telemetry {
                telemetry.publish_summary(&summary)?;
            }
        }

        debug!(metrics = self.metrics.len(), loss_records = self.loss.count(), "resetting metrics");
        self.index.clear();
        self.metrics.clear();
        self.loss = RunningMean::new();

        for sink in self.sinks.iter_mut().filter(|s| s.is_interactive()) {
            sink.write("\n")?;
            sink.flush()?;
        }
        Ok(())
    }

    /// Publish `values` on every telemetry sink. No-op without telemetry.
    pub fn log_custom_metrics(&mut self, values: &BTreeMap<String, f64>) -> MetricsResult<()> {
        self.telemetry.iter_mut().try_for_each(|t| t.log_custom_metrics(values))
    }

    pub fn log_scalar(&mut self, name: &str, value: f64) -> MetricsResult<()> {
        self.telemetry.iter_mut().try_for_each(|t| t.log_scalar(name, value))
    }

    pub fn log_distribution(&mut self, name: &str, values: &[f64]) -> MetricsResult<()> {
        self.telemetry.iter_mut().try_for_each(|t| t.log_distribution(name, values))
    }

    /// Finish every attached telemetry run.
    pub fn finish_telemetry(&mut self) -> MetricsResult<()> {
        self.telemetry.iter_mut().try_for_each(|t| t.finish())
    }

    /// Fold another registry's accumulators into this one.
    ///
    /// Names new to `self` are appended in `other`'s order. Sinks and
    /// telemetry are not touched.
    pub fn merge_from(&mut self, other: &Self) {
        for (name, acc) in &other.metrics {
            self.metric(name).merge(acc);
        }
        self.loss.merge(&other.loss);
    }

    fn ensure_telemetry_active(&self) -> MetricsResult<()> {
        self.telemetry.iter().try_for_each(|t| t.ensure_active())
    }
}

/// Cloneable handle to a registry stored in a [`RegistryCell`].
#[derive(Debug, Clone)]
pub struct SharedRegistry(Arc<Mutex<MetricsRegistry>>);

impl SharedRegistry {
    /// Lock the registry. A panic in another holder does not poison it for
    /// later callers.
    pub fn lock(&self) -> MutexGuard<'_, MetricsRegistry> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True if both handles point at the same registry.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Holds at most one registry for its whole lifetime.
///
/// The process-wide registry lives in a static cell behind
/// [`MetricsRegistry::instance`]; separate cells give each worker (or test) its
/// own instance with the same one-time-creation rule.
#[derive(Debug, Default)]
pub struct RegistryCell {
    slot: OnceLock<SharedRegistry>,
}

impl RegistryCell {
    pub const fn new() -> Self {
        Self { slot: OnceLock::new() }
    }

    /// The registry in this cell, created on first call.
    pub fn instance(&self) -> SharedRegistry {
        self.slot
            .get_or_init(|| SharedRegistry(Arc::new(Mutex::new(MetricsRegistry::empty()))))
            .clone()
    }

    /// Create the registry in this cell.
    ///
    /// # Errors
    /// `MetricsError::DuplicateSingleton` if the cell is already populated.
    pub fn create(&self) -> MetricsResult<SharedRegistry> {
        let mut created = false;
        let shared = self.slot.get_or_init(|| {
            created = true;
            SharedRegistry(Arc::new(Mutex::new(MetricsRegistry::empty())))
        });
        if created {
            debug!("metrics registry created");
            Ok(shared.clone())
        } else {
            Err(MetricsError::DuplicateSingleton)
        }
    }

    pub fn get(&self) -> Option<SharedRegistry> {
        self.slot.get().cloned()
    }
}

static GLOBAL: RegistryCell = RegistryCell::new();
