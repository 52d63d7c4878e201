//! Bridge Facade — one start/observe/cancel contract over submission and polling.
//!
//! State machine:
//!
//! ```text
//! Idle ──start──▶ Submitting ──submitted──▶ Polling ──Complete──▶ Complete
//!   ▲                 │                        │ ──Failed────▶ Failed
//!   │                 └──error─▶ Error ◀───────┘ (cancel, timeout)
//!   └──────────── start (from any state, cancels the active run)
//! ```
//!
//! At most one run is active per bridge. Each run gets a generation number; a
//! run whose generation is stale can no longer move the state machine.

pub mod poller;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::analysis::normalizer::Normalizer;
use crate::models::analysis::NormalizedResult;
use crate::models::request::AnalysisRequest;
use crate::workflow_client::jobs::{JobType, ValidationError};
use crate::workflow_client::{WorkflowClient, WorkflowError};

use poller::{ExecutionPoller, PollOutcome, PollResult, PollSettings, PollSubscription};

pub const SUBMISSION_FAILED: &str = "Failed to start analysis";
pub const RUN_CANCELLED: &str = "Analysis cancelled";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Display stays generic; the upstream detail is only reachable as `source`.
    #[error("Failed to start analysis")]
    UpstreamSubmission(#[source] WorkflowError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeState {
    Idle,
    Submitting,
    Polling { execution_id: String },
    Complete(NormalizedResult),
    Failed,
    Error(String),
}

impl BridgeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BridgeState::Complete(_) | BridgeState::Failed | BridgeState::Error(_)
        )
    }

    fn is_active(&self) -> bool {
        matches!(self, BridgeState::Submitting | BridgeState::Polling { .. })
    }
}

/// Current state plus the generation of the run that set it.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSnapshot {
    pub generation: u64,
    pub state: BridgeState,
}

/// Write access to the state machine for one run.
#[derive(Clone)]
struct StateHandle {
    tx: Arc<watch::Sender<BridgeSnapshot>>,
    generation: u64,
}

impl StateHandle {
    /// Applies `state` only while this run is still the current one.
    fn transition(&self, state: BridgeState) -> bool {
        self.tx.send_if_modified(|tracked| {
            if tracked.generation != self.generation {
                return false;
            }
            tracked.state = state;
            true
        })
    }
}

struct ActiveRun {
    cancel: CancellationToken,
}

/// Drives one job type end to end for a single caller.
pub struct AnalysisBridge {
    client: Arc<WorkflowClient>,
    job: JobType,
    settings: PollSettings,
    state: Arc<watch::Sender<BridgeSnapshot>>,
    active: Option<ActiveRun>,
}

impl AnalysisBridge {
    pub fn new(client: Arc<WorkflowClient>, job: JobType, settings: PollSettings) -> Self {
        let (state, _) = watch::channel(BridgeSnapshot {
            generation: 0,
            state: BridgeState::Idle,
        });
        Self {
            client,
            job,
            settings,
            state: Arc::new(state),
            active: None,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state.borrow().state.clone()
    }

    /// Receiver that follows every state transition.
    pub fn watch_state(&self) -> watch::Receiver<BridgeSnapshot> {
        self.state.subscribe()
    }

    /// Starts a new run, cancelling any active one first.
    ///
    /// Validation failures move the bridge to `Error` and return before any
    /// network call. Otherwise submission and polling continue in the
    /// background and observations arrive on the returned subscription.
    pub fn start(&mut self, request: AnalysisRequest) -> Result<PollSubscription, BridgeError> {
        if let Some(run) = self.active.take() {
            info!(job = self.job.name, "Cancelling previous run before starting a new one");
            run.cancel.cancel();
        }

        let generation = self.next_generation(BridgeState::Idle);
        let handle = StateHandle {
            tx: self.state.clone(),
            generation,
        };

        if let Err(e) = self.job.validate(&request) {
            warn!(job = self.job.name, error = %e, "Rejected analysis request");
            handle.transition(BridgeState::Error(e.to_string()));
            return Err(e.into());
        }

        handle.transition(BridgeState::Submitting);

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let run = Run {
            client: self.client.clone(),
            job: self.job.clone(),
            settings: self.settings,
            cancel: cancel.clone(),
            state: handle,
        };
        tokio::spawn(run.drive(request, tx));

        self.active = Some(ActiveRun {
            cancel: cancel.clone(),
        });
        Ok(PollSubscription::new(rx, cancel))
    }

    /// Cancels the active run. Nothing further is emitted for it.
    pub fn cancel(&mut self) {
        let Some(run) = self.active.take() else {
            return;
        };
        run.cancel.cancel();
        self.state.send_modify(|tracked| {
            tracked.generation += 1;
            if tracked.state.is_active() {
                tracked.state = BridgeState::Error(RUN_CANCELLED.to_string());
            }
        });
        info!(job = self.job.name, "Analysis cancelled by caller");
    }

    fn next_generation(&self, state: BridgeState) -> u64 {
        let mut generation = 0;
        self.state.send_modify(|tracked| {
            tracked.generation += 1;
            tracked.state = state;
            generation = tracked.generation;
        });
        generation
    }
}

impl Drop for AnalysisBridge {
    fn drop(&mut self) {
        if let Some(run) = self.active.take() {
            run.cancel.cancel();
        }
    }
}

/// Everything one background run needs.
struct Run {
    client: Arc<WorkflowClient>,
    job: JobType,
    settings: PollSettings,
    cancel: CancellationToken,
    state: StateHandle,
}

impl Run {
    async fn drive(self, request: AnalysisRequest, tx: mpsc::UnboundedSender<PollResult>) {
        let submitted = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.state.transition(BridgeState::Error(RUN_CANCELLED.to_string()));
                return;
            }
            submitted = self.client.submit(&self.job, &request) => submitted,
        };

        let handle = match submitted {
            Ok(handle) => handle,
            Err(e) => {
                let e = BridgeError::UpstreamSubmission(e);
                error!(job = self.job.name, error = ?e, "Job submission failed");
                self.state
                    .transition(BridgeState::Error(SUBMISSION_FAILED.to_string()));
                return;
            }
        };

        if !self.state.transition(BridgeState::Polling {
            execution_id: handle.execution_id.clone(),
        }) {
            return;
        }
        info!(job = self.job.name, execution_id = %handle.execution_id, "Polling execution");

        let poller = ExecutionPoller::new(
            self.client.clone(),
            self.job.output_task.clone(),
            Normalizer::for_job(&self.job),
            self.settings,
        );

        let next = match poller.run(&handle, &self.cancel, &tx).await {
            PollOutcome::Completed(result) => BridgeState::Complete(result),
            PollOutcome::Failed => BridgeState::Failed,
            PollOutcome::TimedOut => BridgeState::Error(poller::POLL_TIMED_OUT.to_string()),
            PollOutcome::Cancelled => BridgeState::Error(RUN_CANCELLED.to_string()),
        };
        self.state.transition(next);
    }
}
