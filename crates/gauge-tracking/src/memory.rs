//! In-process tracking client that journals every call.
//!
//! Used for offline runs and tests. Clones share one journal, so a handle kept
//! by the caller sees everything the backend sent.

use crate::client::{HistoryEntry, LogValues, RunHandle, RunRequest, TrackingClient, WatchRequest};
use gauge_core::{MetricsError, MetricsResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingOp {
    Authenticate,
    OpenRun,
    Watch,
    Log,
    Finish,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum TrackingCall {
    Authenticate,
    OpenRun { request: RunRequest },
    Watch { run_id: String, request: WatchRequest },
    Log { run_id: String, entry: HistoryEntry },
    Finish { run_id: String },
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<TrackingCall>,
    failures: VecDeque<TrackingOp>,
    runs_opened: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTrackingClient {
    state: Arc<Mutex<State>>,
}

impl MemoryTrackingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of kind `op` fail. Failures queue in order.
    pub fn fail_next(&self, op: TrackingOp) {
        self.lock().failures.push_back(op);
    }

    /// Every successful call, in order.
    pub fn calls(&self) -> Vec<TrackingCall> {
        self.lock().calls.clone()
    }

    /// Values of every successful history write, in order.
    pub fn logged(&self) -> Vec<LogValues> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                TrackingCall::Log { entry, .. } => Some(entry.values.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_failure(state: &mut State, op: TrackingOp) -> bool {
        match state.failures.iter().position(|&queued| queued == op) {
            Some(pos) => {
                state.failures.remove(pos);
                true
            }
            None => false,
        }
    }

    fn run(&self, op: TrackingOp, call: TrackingCall) -> MetricsResult<()> {
        let mut state = self.lock();
        if Self::take_failure(&mut state, op) {
            return Err(match op {
                TrackingOp::Authenticate => MetricsError::Authentication("injected failure".to_string()),
                TrackingOp::OpenRun | TrackingOp::Watch => MetricsError::RunCreation("injected failure".to_string()),
                TrackingOp::Log | TrackingOp::Finish => MetricsError::Publish("injected failure".to_string()),
            });
        }
        state.calls.push(call);
        Ok(())
    }
}

impl TrackingClient for MemoryTrackingClient {
    fn authenticate(&mut self) -> MetricsResult<()> {
        self.run(TrackingOp::Authenticate, TrackingCall::Authenticate)
    }

    fn open_run(&mut self, request: &RunRequest) -> MetricsResult<RunHandle> {
        self.run(TrackingOp::OpenRun, TrackingCall::OpenRun { request: request.clone() })?;
        let mut state = self.lock();
        state.runs_opened += 1;
        Ok(RunHandle { id: format!("local-{}", state.runs_opened), name: request.name.clone() })
    }

    fn watch(&mut self, run: &RunHandle, request: &WatchRequest) -> MetricsResult<()> {
        self.run(TrackingOp::Watch, TrackingCall::Watch { run_id: run.id.clone(), request: request.clone() })
    }

    fn log(&mut self, run: &RunHandle, entry: &HistoryEntry) -> MetricsResult<()> {
        self.run(TrackingOp::Log, TrackingCall::Log { run_id: run.id.clone(), entry: entry.clone() })
    }

    fn finish(&mut self, run: &RunHandle) -> MetricsResult<()> {
        self.run(TrackingOp::Finish, TrackingCall::Finish { run_id: run.id.clone() })
    }
}
