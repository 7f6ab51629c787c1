//! Gauge Tracking
//!
//! Remote experiment tracking for the metrics registry:
//! - `TelemetryBackend` implements `gauge_core::TelemetrySink` over any `TrackingClient`
//! - `HttpTrackingClient` talks to a tracking service over blocking HTTP
//! - `MemoryTrackingClient` journals calls in-process for offline runs
//! - `Histogram` bins distributions before they are published

pub mod backend;
pub mod client;
pub mod config;
pub mod histogram;
pub mod http;
pub mod memory;

pub use backend::{ConnectionState, TelemetryBackend};
pub use client::{HistoryEntry, LogValue, LogValues, RunHandle, RunRequest, TrackingClient, WatchRequest};
pub use config::{DEFAULT_TRACKING_URL, TrackingConfig};
pub use histogram::{DEFAULT_BINS, Histogram};
pub use http::HttpTrackingClient;
pub use memory::{MemoryTrackingClient, TrackingCall, TrackingOp};
