//! Synthetic training loop driven through the metrics registry.

use crate::config::GaugeConfig;
use anyhow::{Context, Result};
use clap::Args;
use gauge_core::{
    CaptureMode, ConsoleSink, MetricsRegistry, Precision, RunOptions, SharedRegistry, StreamSink, TelemetrySink,
    Watchable,
};
use gauge_tracking::{HttpTrackingClient, MemoryTrackingClient, TelemetryBackend, TrackingClient, TrackingConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info};

const LR_DECAY: f64 = 0.9;
const MODEL_WIDTH: usize = 32;

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Training epochs
    #[arg(long, default_value_t = 3)]
    pub epochs: u32,

    /// Training batches per epoch
    #[arg(long, default_value_t = 20)]
    pub batches: u32,

    /// Validation batches after each epoch (0 disables validation)
    #[arg(long, default_value_t = 5)]
    pub val_batches: u32,

    /// Flush a progress line every N training batches
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub flush_every: u32,

    /// Random seed for the synthetic workload
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Initial learning rate, decayed after every epoch
    #[arg(long, default_value_t = 0.01)]
    pub learning_rate: f64,

    /// Number format, e.g. {:.5f} or {:.3e}
    #[arg(long)]
    pub precision: Option<Precision>,

    /// Also append every progress line to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Erase progress lines in place (default: only on a terminal)
    #[arg(long)]
    pub interactive: Option<bool>,

    /// Mirror phase summaries to the tracking service (GAUGE_TRACKING_URL, GAUGE_API_KEY)
    #[arg(long)]
    pub track: bool,

    /// Track into an in-memory journal and print it as JSON lines at exit
    #[arg(long, conflicts_with = "track")]
    pub offline: bool,

    /// Tracking project
    #[arg(long)]
    pub project: Option<String>,

    /// Tracking run name (generated when omitted)
    #[arg(long)]
    pub run_name: Option<String>,

    /// Tag for the tracking run (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Publish weight or gradient histograms of the synthetic model
    #[arg(long)]
    pub watch: bool,

    /// Sample the watched model every N flushes
    #[arg(long)]
    pub watch_frequency: Option<u32>,

    /// What to sample when watching (gradients, parameters)
    #[arg(long, value_parser = parse_capture)]
    pub capture: Option<CaptureMode>,
}

fn parse_capture(raw: &str) -> Result<CaptureMode, String> {
    match raw {
        "gradients" => Ok(CaptureMode::Gradients),
        "parameters" => Ok(CaptureMode::Parameters),
        other => Err(format!("expected gradients or parameters, got {other}")),
    }
}

/// Loop parameters after merging flags over config. Recorded as the run config.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct RunSettings {
    epochs: u32,
    batches: u32,
    val_batches: u32,
    flush_every: u32,
    seed: u64,
    learning_rate: f64,
    precision: Precision,
}

impl RunSettings {
    fn resolve(args: &SimulateArgs, config: &GaugeConfig) -> Self {
        Self {
            epochs: args.epochs,
            batches: args.batches,
            val_batches: args.val_batches,
            flush_every: args.flush_every.max(1),
            seed: args.seed,
            learning_rate: args.learning_rate,
            precision: args.precision.or(config.progress.precision).unwrap_or_default(),
        }
    }
}

/// Tracking setup after merging flags over config. `None` when tracking is off.
fn resolve_run_options(args: &SimulateArgs, config: &GaugeConfig) -> Option<RunOptions> {
    let tracking = &config.tracking;
    if !(args.track || args.offline || tracking.enabled.unwrap_or(false)) {
        return None;
    }

    let defaults = RunOptions::default();
    Some(RunOptions {
        project: args.project.clone().or_else(|| tracking.project.clone()).unwrap_or(defaults.project),
        run_name: args.run_name.clone().or_else(|| tracking.run_name.clone()).unwrap_or_default(),
        watch: args.watch || tracking.watch.unwrap_or(false),
        watch_frequency: args.watch_frequency.or(tracking.watch_frequency).unwrap_or(defaults.watch_frequency),
        watch_capture_mode: args.capture.or(tracking.capture).unwrap_or(defaults.watch_capture_mode),
        tags: if args.tags.is_empty() { tracking.tags.clone().unwrap_or_default() } else { args.tags.clone() },
    })
}

#[derive(Debug)]
struct ModelState {
    weights: Vec<f64>,
    gradients: Vec<f64>,
}

/// A single dense layer whose weights drift a little every batch.
#[derive(Debug, Clone)]
struct SyntheticModel {
    state: Arc<Mutex<ModelState>>,
}

impl SyntheticModel {
    fn new(rng: &mut StdRng, width: usize) -> Self {
        let weights = (0..width).map(|_| rng.gen_range(-0.5..0.5)).collect();
        Self { state: Arc::new(Mutex::new(ModelState { weights, gradients: vec![0.0; width] })) }
    }

    fn step(&self, rng: &mut StdRng, learning_rate: f64, loss: f64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let ModelState { weights, gradients } = &mut *state;
        for (w, g) in weights.iter_mut().zip(gradients.iter_mut()) {
            *g = rng.gen_range(-1.0..1.0) * loss;
            *w -= learning_rate * *g;
        }
    }
}

impl Watchable for SyntheticModel {
    fn name(&self) -> &str {
        "synthetic-dense"
    }

    fn sample(&self, mode: CaptureMode) -> Vec<(String, Vec<f64>)> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let values = match mode {
            CaptureMode::Gradients => state.gradients.clone(),
            CaptureMode::Parameters => state.weights.clone(),
        };
        vec![("dense.weight".to_string(), values)]
    }
}

/// Loss curve that decays with training progress, plus noise.
fn synthetic_loss(progress: f64, rng: &mut StdRng) -> f64 {
    (-3.0 * progress).exp() + rng.gen_range(0.0..0.05)
}

pub fn execute(args: &SimulateArgs, config: &GaugeConfig) -> Result<()> {
    let settings = RunSettings::resolve(args, config);
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let model = SyntheticModel::new(&mut rng, MODEL_WIDTH);

    let registry = MetricsRegistry::instance();
    let journal = {
        let mut reg = registry.lock();

        let interactive = args.interactive.or(config.progress.interactive);
        reg.attach_sink(interactive.map_or_else(ConsoleSink::detect_stdout, ConsoleSink::stdout));

        if let Some(path) = args.log_file.as_ref().or(config.progress.log_file.as_ref()) {
            let sink = StreamSink::append_to(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            reg.attach_sink(sink);
        }

        match resolve_run_options(args, config) {
            None => None,
            Some(options) => {
                let watched: Option<Box<dyn Watchable>> =
                    if options.watch { Some(Box::new(model.clone())) } else { None };

                if args.offline {
                    let journal = MemoryTrackingClient::new();
                    reg.attach_telemetry(start_backend(journal.clone(), &settings, watched, options)?);
                    Some(journal)
                } else {
                    let mut tracking = TrackingConfig::from_env()?;
                    if let Some(url) = &config.tracking.url {
                        tracking.base_url.clone_from(url);
                    }
                    let client = HttpTrackingClient::new(&tracking)?;
                    reg.attach_telemetry(start_backend(client, &settings, watched, options)?);
                    None
                }
            }
        }
    };

    let outcome = run_epochs(&registry, &settings, &model, &mut rng);

    if let Some(journal) = journal {
        for call in journal.calls() {
            println!("{}", serde_json::to_string(&call)?);
        }
    }
    outcome
}

fn start_backend<C: TrackingClient>(
    client: C,
    settings: &RunSettings,
    model: Option<Box<dyn Watchable>>,
    options: RunOptions,
) -> Result<TelemetryBackend<C>> {
    let mut backend = TelemetryBackend::new(client);
    let run_config = TelemetryBackend::<C>::config_snapshot(settings)?;
    backend.initialize(run_config, model, options).context("Failed to start tracking run")?;
    Ok(backend)
}

/// Run the loop, then finish every tracking run whether or not the loop failed.
///
/// A loop error wins over a finish error; the latter is only logged then.
fn run_epochs(
    registry: &SharedRegistry,
    settings: &RunSettings,
    model: &SyntheticModel,
    rng: &mut StdRng,
) -> Result<()> {
    let outcome = train_loop(registry, settings, model, rng);
    let finished = registry.lock().finish_telemetry();
    match (outcome, finished) {
        (Ok(()), finished) => Ok(finished?),
        (Err(e), Err(close)) => {
            error!(error = %close, "failed to finish tracking run after loop error");
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
    }
}

fn train_loop(
    registry: &SharedRegistry,
    settings: &RunSettings,
    model: &SyntheticModel,
    rng: &mut StdRng,
) -> Result<()> {
    let mut reg = registry.lock();
    let total_batches = (f64::from(settings.epochs) * f64::from(settings.batches)).max(1.0);
    let mut learning_rate = settings.learning_rate;

    for epoch in 0..settings.epochs {
        let started = Instant::now();

        for batch in 0..settings.batches {
            let progress = f64::from(epoch).mul_add(f64::from(settings.batches), f64::from(batch)) / total_batches;
            let loss = synthetic_loss(progress, rng);
            reg.metric("iou").record((1.0 - loss / 2.0).clamp(0.0, 1.0));
            reg.metric("accuracy").record((1.0 - loss / 3.0 + rng.gen_range(-0.02..0.02)).clamp(0.0, 1.0));
            model.step(rng, learning_rate, loss);

            if (batch + 1).is_multiple_of(settings.flush_every) || batch + 1 == settings.batches {
                reg.flush_progress(i64::from(epoch), u64::from(batch), loss, settings.precision)?;
            } else {
                reg.record_loss(loss);
            }
        }
        reg.reset()?;

        if settings.val_batches > 0 {
            let progress = f64::from(epoch + 1) * f64::from(settings.batches) / total_batches;
            for batch in 0..settings.val_batches {
                let loss = synthetic_loss(progress, rng) + 0.05;
                reg.metric("iou").record((1.0 - loss / 2.0).clamp(0.0, 1.0));
                reg.flush_progress(-1, u64::from(batch), loss, settings.precision)?;
            }
            reg.reset()?;
        }

        reg.log_scalar("learning_rate", learning_rate)?;
        let seconds = started.elapsed().as_secs_f64();
        let custom = BTreeMap::from([
            ("epoch_seconds".to_string(), seconds),
            ("samples_per_second".to_string(), f64::from(settings.batches) / seconds.max(1e-9)),
        ]);
        reg.log_custom_metrics(&custom)?;

        info!(epoch, learning_rate, seconds, "epoch complete");
        learning_rate *= LR_DECAY;
    }

    debug!(epochs = settings.epochs, "simulation finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingSection;
    use gauge_core::{MemorySink, MetricsError, RegistryCell, RunConfig};
    use gauge_tracking::{LogValue, LogValues, TrackingCall, TrackingOp};

    fn args() -> SimulateArgs {
        SimulateArgs {
            epochs: 2,
            batches: 4,
            val_batches: 2,
            flush_every: 1,
            seed: 7,
            learning_rate: 0.1,
            precision: None,
            log_file: None,
            interactive: None,
            track: false,
            offline: false,
            project: None,
            run_name: None,
            tags: Vec::new(),
            watch: false,
            watch_frequency: None,
            capture: None,
        }
    }

    fn settings() -> RunSettings {
        RunSettings::resolve(&args(), &GaugeConfig::default())
    }

    #[test]
    fn test_parse_capture() {
        assert_eq!(parse_capture("gradients"), Ok(CaptureMode::Gradients));
        assert_eq!(parse_capture("parameters"), Ok(CaptureMode::Parameters));
        assert!(parse_capture("all").is_err());
    }

    #[test]
    fn test_precision_flag_beats_config() {
        let mut config = GaugeConfig::default();
        config.progress.precision = Some(Precision::Fixed(2));
        assert_eq!(RunSettings::resolve(&args(), &config).precision, Precision::Fixed(2));

        let mut flagged = args();
        flagged.precision = Some(Precision::Scientific(3));
        assert_eq!(RunSettings::resolve(&flagged, &config).precision, Precision::Scientific(3));
        assert_eq!(settings().precision, Precision::Fixed(5));
    }

    #[test]
    fn test_tracking_off_by_default() {
        assert!(resolve_run_options(&args(), &GaugeConfig::default()).is_none());
    }

    #[test]
    fn test_run_options_merge_config() {
        let config = GaugeConfig {
            tracking: TrackingSection {
                enabled: Some(true),
                project: Some("scenes".to_string()),
                tags: Some(vec!["nightly".to_string()]),
                watch_frequency: Some(3),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut cli = args();
        cli.run_name = Some("bedrooms".to_string());

        let options = resolve_run_options(&cli, &config).unwrap();
        assert_eq!(options.project, "scenes");
        assert_eq!(options.run_name, "bedrooms");
        assert_eq!(options.tags, vec!["nightly".to_string()]);
        assert_eq!(options.watch_frequency, 3);
        assert!(!options.watch);
    }

    #[test]
    fn test_model_sampling_modes() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = SyntheticModel::new(&mut rng, 8);
        let before = model.sample(CaptureMode::Parameters);
        assert_eq!(before[0].1.len(), 8);
        assert!(model.sample(CaptureMode::Gradients)[0].1.iter().all(|g| *g == 0.0));

        model.step(&mut rng, 0.1, 1.0);
        assert_ne!(model.sample(CaptureMode::Parameters), before);
    }

    #[test]
    fn test_settings_snapshot_is_a_mapping() {
        let snapshot = TelemetryBackend::<MemoryTrackingClient>::config_snapshot(&settings()).unwrap();
        assert_eq!(snapshot["epochs"], 2);
        assert_eq!(snapshot["precision"], "{:.5f}");
    }

    #[test]
    fn test_run_epochs_flushes_and_publishes() {
        let settings = settings();
        let mut rng = StdRng::seed_from_u64(settings.seed);
        let model = SyntheticModel::new(&mut rng, 4);

        let journal = MemoryTrackingClient::new();
        let mut backend = TelemetryBackend::new(journal.clone());
        backend.initialize(RunConfig::new(), None, RunOptions::default()).unwrap();

        let registry = RegistryCell::new().instance();
        let output = MemorySink::durable();
        {
            let mut reg = registry.lock();
            reg.attach_sink(output.clone());
            reg.attach_telemetry(backend);
        }

        run_epochs(&registry, &settings, &model, &mut rng).unwrap();

        // 2 epochs x (4 training + 2 validation) flushes
        let lines = output.writes();
        assert_eq!(lines.len(), 12);
        assert!(lines[0].starts_with("epoch: 0 - batch: 0 - loss: "));
        assert!(lines[4].starts_with("epoch: -1 - batch: 0 - loss: "));
        assert!(lines.iter().all(|l| l.ends_with('\n') && l.contains(" - iou: ")));

        // per epoch: train summary, val summary, learning rate, custom metrics
        let logged = journal.logged();
        assert_eq!(logged.len(), 8);
        assert!(logged[0].contains_key("train_accuracy"));
        assert!(logged[1].contains_key("val_iou"));
        assert!(!logged[1].contains_key("val_accuracy"));
        assert_eq!(logged[2]["learning_rate"], LogValue::Float(0.1));
        assert!(logged[3].contains_key("epoch_seconds"));
        assert!(matches!(journal.calls().last(), Some(TrackingCall::Finish { .. })));
    }

    /// Run a tracked simulation from seed 0 and return the progress lines and the outcome.
    fn tracked_run(settings: &RunSettings, journal: &MemoryTrackingClient) -> (Vec<String>, Result<()>) {
        let mut rng = StdRng::seed_from_u64(0);
        let model = SyntheticModel::new(&mut rng, 4);

        let mut backend = TelemetryBackend::new(journal.clone());
        backend.initialize(RunConfig::new(), None, RunOptions::default()).unwrap();

        let registry = RegistryCell::new().instance();
        let output = MemorySink::durable();
        {
            let mut reg = registry.lock();
            reg.attach_sink(output.clone());
            reg.attach_telemetry(backend);
        }

        let outcome = run_epochs(&registry, settings, &model, &mut rng);
        (output.writes(), outcome)
    }

    fn train_summaries(logged: &[LogValues]) -> Vec<LogValue> {
        logged.iter().filter_map(|entry| entry.get("train_loss").cloned()).collect()
    }

    #[test]
    fn test_flush_every_thins_progress_lines() {
        let thinned = RunSettings { flush_every: 3, val_batches: 0, ..settings() };
        let journal = MemoryTrackingClient::new();
        let (lines, outcome) = tracked_run(&thinned, &journal);
        outcome.unwrap();

        // batches 2 and 3 of each 4-batch epoch
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("epoch: 0 - batch: 2 - "));
        assert!(lines[1].starts_with("epoch: 0 - batch: 3 - "));

        // same seed, every batch flushed: the loss mean must not depend on flush spacing
        let every = RunSettings { flush_every: 1, val_batches: 0, ..settings() };
        let reference = MemoryTrackingClient::new();
        let (all_lines, outcome) = tracked_run(&every, &reference);
        outcome.unwrap();
        assert_eq!(all_lines.len(), 8);

        let thinned_losses = train_summaries(&journal.logged());
        assert_eq!(thinned_losses.len(), 2);
        assert_eq!(thinned_losses, train_summaries(&reference.logged()));
    }

    #[test]
    fn test_failed_publish_still_finishes_run() {
        let settings = RunSettings { val_batches: 0, ..settings() };
        let journal = MemoryTrackingClient::new();
        journal.fail_next(TrackingOp::Log);

        let (lines, outcome) = tracked_run(&settings, &journal);

        let err = outcome.unwrap_err();
        assert!(err.downcast_ref::<MetricsError>().is_some_and(|e| matches!(e, MetricsError::Publish(_))));
        // the loop stops at the first epoch's summary
        assert_eq!(lines.len(), 4);
        assert!(journal.logged().is_empty());
        assert!(matches!(journal.calls().last(), Some(TrackingCall::Finish { .. })));
    }
}
