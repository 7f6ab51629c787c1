//! Gauge CLI - drives training loops through the metrics registry.
//!
//! The `gauge` binary runs a synthetic training loop that exercises the
//! registry end to end: console and file sinks, phase resets, and optional
//! remote tracking.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::simulate::{self, SimulateArgs};
use config::GaugeConfig;

/// Gauge - live metric aggregation for training loops
#[derive(Parser, Debug)]
#[command(name = "gauge", author, version, about = "Gauge - live metric aggregation for training loops")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Config file to use instead of ~/.gauge/config.toml and ./.gaugerc
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a synthetic training loop
    ///
    /// Records loss and metrics every batch, flushes progress lines to the
    /// console (and optionally a log file), resets at every phase boundary
    /// and mirrors phase summaries to a tracking run when enabled.
    Simulate(SimulateArgs),
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => GaugeConfig::load_from_file(path)?,
        None => GaugeConfig::discover_and_load()?,
    };

    // Initialize tracing
    let log_level = args.log_level.as_deref().or(config.log_level.as_deref()).unwrap_or("info");
    let level = match log_level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout carries progress lines
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Simulate(sim) => simulate::execute(&sim, &config),
    }
}
