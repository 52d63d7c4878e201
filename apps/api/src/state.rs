use std::sync::Arc;

use crate::analysis::normalizer::Normalizer;
use crate::bridge::poller::ExecutionPoller;
use crate::bridge::AnalysisBridge;
use crate::config::Config;
use crate::workflow_client::WorkflowClient;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<WorkflowClient>,
    pub config: Config,
    /// Single-tick poller behind `GET /api/status`.
    pub poller: ExecutionPoller,
}

impl AppState {
    pub fn new(client: WorkflowClient, config: Config) -> Self {
        let client = Arc::new(client);
        let poller = ExecutionPoller::new(
            client.clone(),
            config.job.output_task.clone(),
            Normalizer::for_job(&config.job),
            config.poll,
        );
        Self {
            client,
            config,
            poller,
        }
    }

    /// A fresh bridge for one streaming caller.
    pub fn bridge(&self) -> AnalysisBridge {
        AnalysisBridge::new(self.client.clone(), self.config.job.clone(), self.config.poll)
    }
}
