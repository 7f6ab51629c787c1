//! Gauge Core
//!
//! Live metric aggregation for training and generation loops:
//! - Running-mean accumulators (`RunningMean`)
//! - Progress lines rendered to interactive or durable sinks (`Sink`)
//! - The shared registry driving both (`MetricsRegistry`)
//! - The extension point for remote experiment tracking (`TelemetrySink`)

pub mod aggregate;
pub mod error;
pub mod precision;
pub mod registry;
pub mod sink;
pub mod telemetry;

pub use aggregate::RunningMean;
pub use error::{MetricsError, MetricsResult};
pub use precision::Precision;
pub use registry::{MetricsRegistry, RegistryCell, SharedRegistry};
pub use sink::{ConsoleSink, ConsoleStream, MemorySink, Sink, StreamSink};
pub use telemetry::{
    CaptureMode, Phase, PhaseSummary, ProgressUpdate, RunConfig, RunOptions, TelemetrySink, Watchable,
};
