/// Workflow Client — the single point of entry for all workflow engine calls in Scout.
///
/// ARCHITECTURAL RULE: No other module may talk to the engine's HTTP API directly.
/// Submission and status reads both go through `WorkflowClient`.
///
/// Auth: HTTP Basic with the configured credential pair. No other scheme is supported.
use async_trait::async_trait;
use reqwest::{header, multipart::Form, Client, Url};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::models::analysis::RawTaskOutput;
use crate::models::request::{AnalysisRequest, ExecutionHandle};

pub mod jobs;

use jobs::JobType;

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Workflow engine error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Submission response carried no execution id")]
    MissingExecutionId,

    #[error("Cannot build status URL from base '{0}'")]
    InvalidStatusUrl(String),
}

impl WorkflowError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            WorkflowError::Api { status, .. } => Some(*status),
            WorkflowError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: Option<String>,
}

/// Execution state as seen by the caller. Every non-terminal remote state
/// (CREATED, RUNNING, PAUSED, RESTARTED, ...) collapses into `QueuedOrRunning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    QueuedOrRunning,
    Succeeded,
    Failed,
}

impl ExecutionState {
    pub fn from_remote(current: &str) -> Self {
        match current {
            "SUCCESS" => ExecutionState::Succeeded,
            "FAILED" | "KILLED" | "WARNING" => ExecutionState::Failed,
            _ => ExecutionState::QueuedOrRunning,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateField {
    pub current: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRun {
    pub task_id: String,
    #[serde(default)]
    pub outputs: Option<Value>,
}

/// Subset of the engine's execution document that the bridge reads.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub state: StateField,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub task_run_list: Vec<TaskRun>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<TaskRun>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<TaskRun>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ExecutionRecord {
    pub fn state(&self) -> ExecutionState {
        ExecutionState::from_remote(&self.state.current)
    }

    /// `outputs.value` of the first run of `task_id`. Null counts as absent.
    pub fn task_output(&self, task_id: &str) -> Option<RawTaskOutput> {
        self.task_run_list
            .iter()
            .find(|t| t.task_id == task_id)
            .and_then(|t| t.outputs.as_ref())
            .and_then(|outputs| outputs.get("value"))
            .filter(|v| !v.is_null())
            .cloned()
            .map(RawTaskOutput::from)
    }
}

/// Anything that can report the current state of an execution.
/// `WorkflowClient` is the production implementation.
#[async_trait]
pub trait ExecutionSource: Send + Sync {
    async fn fetch_execution(
        &self,
        handle: &ExecutionHandle,
    ) -> Result<ExecutionRecord, WorkflowError>;
}

/// HTTP client for one workflow engine deployment.
#[derive(Clone)]
pub struct WorkflowClient {
    client: Client,
    config: ConnectionConfig,
}

impl WorkflowClient {
    pub fn new(config: ConnectionConfig) -> Result<Self, WorkflowError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Submits one job. Exactly one POST, no retries: the caller decides whether to try again.
    pub async fn submit(
        &self,
        job: &JobType,
        request: &AnalysisRequest,
    ) -> Result<ExecutionHandle, WorkflowError> {
        let form = job
            .form_fields(request)
            .into_iter()
            .fold(Form::new(), |form, (name, value)| form.text(name, value));

        let response = self
            .client
            .post(self.config.submission_endpoint.clone())
            .basic_auth(
                &self.config.credential_user,
                Some(&self.config.credential_secret),
            )
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            warn!(status = status.as_u16(), body = %body, job = job.name, "Job submission rejected");
            return Err(WorkflowError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SubmitResponse = serde_json::from_str(&body).map_err(|e| {
            warn!(body = %body, "Submission response is not JSON");
            WorkflowError::MalformedResponse(e.to_string())
        })?;

        let execution_id = parsed
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or(WorkflowError::MissingExecutionId)?;

        debug!(execution_id = %execution_id, job = job.name, "Job submitted");
        Ok(ExecutionHandle::new(execution_id))
    }

    /// `{status_endpoint_base}/executions/{execution_id}`
    pub fn status_url(&self, handle: &ExecutionHandle) -> Result<Url, WorkflowError> {
        let base = &self.config.status_endpoint_base;
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| WorkflowError::InvalidStatusUrl(base.to_string()))?
            .pop_if_empty()
            .push("executions")
            .push(&handle.execution_id);
        Ok(url)
    }
}

#[async_trait]
impl ExecutionSource for WorkflowClient {
    async fn fetch_execution(
        &self,
        handle: &ExecutionHandle,
    ) -> Result<ExecutionRecord, WorkflowError> {
        let response = self
            .client
            .get(self.status_url(handle)?)
            .basic_auth(
                &self.config.credential_user,
                Some(&self.config.credential_secret),
            )
            // Status must always reflect the engine's current state.
            .header(header::CACHE_CONTROL, "no-cache, no-store")
            .header(header::PRAGMA, "no-cache")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(WorkflowError::Api {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| WorkflowError::MalformedResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header as header_eq, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // base64("user:secret")
    const EXPECTED_AUTH: &str = "Basic dXNlcjpzZWNyZXQ=";

    fn client_for(server: &MockServer) -> WorkflowClient {
        let uri = server.uri();
        let config = ConnectionConfig::from_lookup(|key| match key {
            "KESTRA_FLOW_URL" => Some(format!("{uri}/webhook/career")),
            "KESTRA_BASE_URL" => Some(format!("{uri}/api/v1/")),
            "KESTRA_USERNAME" => Some("user".to_string()),
            "KESTRA_PASSWORD" => Some("secret".to_string()),
            _ => None,
        })
        .unwrap();
        WorkflowClient::new(config).unwrap()
    }

    fn career_request() -> AnalysisRequest {
        [
            ("company", "Acme"),
            ("role", "Engineer"),
            ("level", "Senior"),
            ("resume", "Built things."),
            ("ignored", "should not be sent"),
        ]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn test_submit_sends_multipart_with_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook/career"))
            .and(header_eq("authorization", EXPECTED_AUTH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "exec-42"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let handle = client
            .submit(&JobType::career_ops(), &career_request())
            .await
            .unwrap();
        assert_eq!(handle, ExecutionHandle::new("exec-42"));

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body).to_string();
        for (name, value) in [
            ("company_name", "Acme"),
            ("job_role", "Engineer"),
            ("experience_level", "Senior"),
            ("resume_text", "Built things."),
        ] {
            assert!(body.contains(&format!("name=\"{name}\"")), "missing {name}");
            assert!(body.contains(value), "missing value for {name}");
        }
        assert_eq!(body.matches("Content-Disposition: form-data;").count(), 4);
        assert!(!body.contains("should not be sent"));
    }

    #[tokio::test]
    async fn test_submit_non_2xx_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("engine down"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .submit(&JobType::career_ops(), &career_request())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Api { status: 503, ref body } if body == "engine down"));
        assert_eq!(err.status_code(), Some(503));
    }

    #[tokio::test]
    async fn test_submit_without_id_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "CREATED"})))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .submit(&JobType::career_ops(), &career_request())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::MissingExecutionId));
    }

    #[tokio::test]
    async fn test_submit_non_json_success_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .submit(&JobType::career_ops(), &career_request())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_fetch_execution_reads_state_and_output() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/executions/exec-42"))
            .and(header_eq("authorization", EXPECTED_AUTH))
            .and(header_exists("cache-control"))
            .and(header_eq("pragma", "no-cache"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "exec-42",
                "state": {"current": "SUCCESS"},
                "taskRunList": [
                    {"taskId": "research", "outputs": {"value": "ignored"}},
                    {"taskId": "merge_results", "outputs": {"value": "{\"status\":\"SAFE\"}"}}
                ]
            })))
            .mount(&server)
            .await;

        let record = client_for(&server)
            .fetch_execution(&ExecutionHandle::new("exec-42"))
            .await
            .unwrap();
        assert_eq!(record.state(), ExecutionState::Succeeded);
        assert_eq!(
            record.task_output("merge_results"),
            Some(RawTaskOutput::Text("{\"status\":\"SAFE\"}".to_string()))
        );
        assert_eq!(record.task_output("missing"), None);
    }

    #[tokio::test]
    async fn test_fetch_execution_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_execution(&ExecutionHandle::new("nope"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(404));
    }

    #[test]
    fn test_execution_state_mapping() {
        assert_eq!(ExecutionState::from_remote("SUCCESS"), ExecutionState::Succeeded);
        for failed in ["FAILED", "KILLED", "WARNING"] {
            assert_eq!(ExecutionState::from_remote(failed), ExecutionState::Failed);
        }
        for running in ["CREATED", "RUNNING", "PAUSED", "KILLING", ""] {
            assert_eq!(
                ExecutionState::from_remote(running),
                ExecutionState::QueuedOrRunning
            );
        }
    }

    #[test]
    fn test_record_tolerates_null_task_list() {
        let record: ExecutionRecord = serde_json::from_value(json!({
            "state": {"current": "SUCCESS"},
            "taskRunList": null
        }))
        .unwrap();
        assert!(record.task_run_list.is_empty());
        assert_eq!(record.task_output("merge_results"), None);
    }

    #[test]
    fn test_null_output_value_is_absent() {
        let record: ExecutionRecord = serde_json::from_value(json!({
            "state": {"current": "SUCCESS"},
            "taskRunList": [{"taskId": "merge_results", "outputs": {"value": null}}]
        }))
        .unwrap();
        assert_eq!(record.task_output("merge_results"), None);
    }

    #[test]
    fn test_status_url_handles_trailing_slash() {
        let config = ConnectionConfig::from_lookup(|key| match key {
            "KESTRA_FLOW_URL" => Some("http://kestra/webhook".to_string()),
            "KESTRA_BASE_URL" => Some("http://kestra/api/v1/".to_string()),
            _ => Some("x".to_string()),
        })
        .unwrap();
        let client = WorkflowClient::new(config).unwrap();
        let url = client.status_url(&ExecutionHandle::new("abc 1")).unwrap();
        assert_eq!(url.as_str(), "http://kestra/api/v1/executions/abc%201");
    }
}
