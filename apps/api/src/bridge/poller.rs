//! Execution Status Poller.
//!
//! Polls one execution on a fixed cadence until the engine reports a terminal
//! state, emitting one [`PollResult`] per tick. Ticks never overlap: each tick
//! awaits its response before the next sleep starts, so observations arrive in
//! response order. Cancellation is checked before every fetch, raced against
//! the in-flight request and checked again before emitting.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::analysis::normalizer::Normalizer;
use crate::models::analysis::NormalizedResult;
use crate::models::request::ExecutionHandle;
use crate::workflow_client::{ExecutionRecord, ExecutionSource, ExecutionState, WorkflowError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

pub const STATUS_CHECK_FAILED: &str = "Status check failed; retrying";
pub const POLL_TIMED_OUT: &str = "Analysis timed out";

/// One observation per poll tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollResult {
    Running,
    Complete(NormalizedResult),
    Failed,
    /// Non-terminal unless it reports a timeout: the cadence continues.
    Error(String),
}

impl PollResult {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollResult::Complete(_) | PollResult::Failed)
    }
}

/// How polling ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed(NormalizedResult),
    Failed,
    TimedOut,
    Cancelled,
}

/// Cadence settings. `max_duration: None` polls until a terminal state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_duration: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_duration: None,
        }
    }
}

/// Receiving end of a poll sequence.
///
/// Yields nothing once cancelled, including observations already buffered.
/// Dropping the subscription cancels the poller.
pub struct PollSubscription {
    rx: mpsc::UnboundedReceiver<PollResult>,
    cancel: CancellationToken,
}

impl PollSubscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<PollResult>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Next observation, or `None` once polling ended or was cancelled.
    pub async fn recv(&mut self) -> Option<PollResult> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = self.rx.recv() => item.filter(|_| !self.cancel.is_cancelled()),
        }
    }

}

impl Drop for PollSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Polls executions of one job type against one engine.
#[derive(Clone)]
pub struct ExecutionPoller {
    source: Arc<dyn ExecutionSource>,
    output_task: String,
    normalizer: Normalizer,
    settings: PollSettings,
}

impl ExecutionPoller {
    pub fn new(
        source: Arc<dyn ExecutionSource>,
        output_task: impl Into<String>,
        normalizer: Normalizer,
        settings: PollSettings,
    ) -> Self {
        Self {
            source,
            output_task: output_task.into(),
            normalizer,
            settings,
        }
    }

    /// One tick: fetch once and classify. Transport and HTTP failures become `Error`.
    pub async fn observe_once(&self, handle: &ExecutionHandle) -> PollResult {
        let fetched = self.source.fetch_execution(handle).await;
        self.classify(handle, fetched)
    }

    /// Drives the cadence until a terminal observation, timeout or cancellation.
    pub async fn run(
        &self,
        handle: &ExecutionHandle,
        cancel: &CancellationToken,
        tx: &mpsc::UnboundedSender<PollResult>,
    ) -> PollOutcome {
        let started = Instant::now();
        let mut tick = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }

            tick += 1;
            let observation = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                obs = self.observe_once(handle) => obs,
            };

            // A response that lands after cancellation is discarded.
            if cancel.is_cancelled() {
                return PollOutcome::Cancelled;
            }

            debug!(execution_id = %handle.execution_id, tick, ?observation, "Poll tick");

            let outcome = match &observation {
                PollResult::Complete(result) => Some(PollOutcome::Completed(result.clone())),
                PollResult::Failed => Some(PollOutcome::Failed),
                PollResult::Running | PollResult::Error(_) => None,
            };

            if tx.send(observation).is_err() {
                info!(execution_id = %handle.execution_id, "Poll subscriber went away");
                return PollOutcome::Cancelled;
            }

            if let Some(outcome) = outcome {
                info!(execution_id = %handle.execution_id, tick, "Execution reached a terminal state");
                return outcome;
            }

            if let Some(max) = self.settings.max_duration {
                if started.elapsed() >= max {
                    warn!(
                        execution_id = %handle.execution_id,
                        max_secs = max.as_secs(),
                        "Giving up on execution after maximum poll duration"
                    );
                    let _ = tx.send(PollResult::Error(POLL_TIMED_OUT.to_string()));
                    return PollOutcome::TimedOut;
                }
            }
        }
    }

    fn classify(
        &self,
        handle: &ExecutionHandle,
        fetched: Result<ExecutionRecord, WorkflowError>,
    ) -> PollResult {
        let record = match fetched {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    execution_id = %handle.execution_id,
                    status = ?e.status_code(),
                    error = %e,
                    "Status check failed"
                );
                return PollResult::Error(STATUS_CHECK_FAILED.to_string());
            }
        };

        match record.state() {
            ExecutionState::QueuedOrRunning => PollResult::Running,
            ExecutionState::Failed => {
                info!(
                    execution_id = %handle.execution_id,
                    state = %record.state.current,
                    "Execution failed on the engine"
                );
                PollResult::Failed
            }
            ExecutionState::Succeeded => {
                let output = record.task_output(&self.output_task);
                if output.is_none() {
                    warn!(
                        execution_id = %handle.execution_id,
                        task = %self.output_task,
                        "Execution succeeded without output on the merge task"
                    );
                }
                PollResult::Complete(self.normalizer.normalize(output.as_ref()))
            }
        }
    }
}
