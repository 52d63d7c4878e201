//! Axum route handlers for the Analysis API.

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bridge::poller::{PollResult, PollSubscription};
use crate::bridge::{AnalysisBridge, BridgeError, BridgeState};
use crate::documents::{extract_resume_text, MAX_RESUME_BYTES};
use crate::errors::AppError;
use crate::models::request::{AnalysisRequest, ExecutionHandle};
use crate::state::AppState;

/// Multipart part carrying the resume PDF.
const RESUME_FILE_FIELD: &str = "resume_file";

/// Body limit for `/api/analyze/upload`: the largest resume plus room for the text fields.
pub const UPLOAD_BODY_LIMIT: usize = MAX_RESUME_BYTES + 256 * 1024;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub success: bool,
    pub execution_id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub id: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/analyze
///
/// Submits one job built from a flat JSON object of fields.
pub async fn handle_analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    submit(&state, request).await.map(Json)
}

/// POST /api/analyze/upload
///
/// Same as `/api/analyze`, but accepts a multipart form. A `resume_file` PDF
/// part is converted to text and submitted as the `resume` field.
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let mut request = AnalysisRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == RESUME_FILE_FIELD {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::Validation(format!("Could not read {name}: {e}")))?;
            let text = tokio::task::spawn_blocking(move || extract_resume_text(&bytes))
                .await
                .map_err(|e| AppError::Internal(anyhow::anyhow!("PDF extraction panicked: {e}")))??;
            info!(chars = text.len(), "Extracted resume text from upload");
            request.insert("resume", text);
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| AppError::Validation(format!("Could not read {name}: {e}")))?;
            request.insert(name, value);
        }
    }

    debug!(fields = ?request.keys().collect::<Vec<_>>(), "Parsed multipart analysis request");
    submit(&state, request).await.map(Json)
}

/// GET /api/status?id=<execution_id>
///
/// One poll tick for an execution started elsewhere.
pub async fn handle_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<(StatusCode, Json<PollResult>), AppError> {
    let id = query
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Missing ID".to_string()))?;

    let observation = state.poller.observe_once(&ExecutionHandle::new(id)).await;
    let status = match observation {
        PollResult::Error(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    Ok((status, Json(observation)))
}

/// POST /api/analyze/stream
///
/// Submits and polls on the server, streaming every observation as a
/// server-sent event. Closing the connection cancels polling.
pub async fn handle_stream(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let mut bridge = state.bridge();
    let subscription = bridge.start(request)?;

    let stream = stream::unfold(
        StreamState {
            bridge,
            subscription,
            observed: false,
            done: false,
        },
        next_event,
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

async fn submit(state: &AppState, request: AnalysisRequest) -> Result<AnalyzeResponse, AppError> {
    let job = &state.config.job;
    job.validate(&request).map_err(BridgeError::from)?;

    let handle = state
        .client
        .submit(job, &request)
        .await
        .map_err(BridgeError::UpstreamSubmission)?;

    info!(job = job.name, execution_id = %handle.execution_id, "Analysis submitted");

    Ok(AnalyzeResponse {
        success: true,
        execution_id: handle.execution_id,
        message: "Analysis started".to_string(),
    })
}

struct StreamState {
    bridge: AnalysisBridge,
    subscription: PollSubscription,
    observed: bool,
    done: bool,
}

impl Drop for StreamState {
    /// The stream is dropped when the client disconnects.
    fn drop(&mut self) {
        if !self.done {
            info!("Stream closed before the run finished; cancelling");
            self.bridge.cancel();
        }
    }
}

async fn next_event(
    mut st: StreamState,
) -> Option<(Result<Event, axum::Error>, StreamState)> {
    if st.done {
        return None;
    }

    match st.subscription.recv().await {
        Some(observation) => {
            st.observed = true;
            st.done = observation.is_terminal();
            let event = Event::default()
                .event(event_name(&observation))
                .json_data(&observation);
            Some((event, st))
        }
        None => {
            st.done = true;
            // A run that ended before its first observation failed to submit.
            match settled_state(&st.bridge).await {
                BridgeState::Error(message) if !st.observed => {
                    warn!(%message, "Streaming run ended without observations");
                    let event = Event::default()
                        .event("error")
                        .json_data(PollResult::Error(message));
                    Some((event, st))
                }
                _ => None,
            }
        }
    }
}

/// Waits for the bridge to leave `Submitting`/`Polling`.
async fn settled_state(bridge: &AnalysisBridge) -> BridgeState {
    let mut rx = bridge.watch_state();
    loop {
        let state = rx.borrow_and_update().state.clone();
        if state.is_terminal() || rx.changed().await.is_err() {
            return state;
        }
    }
}

fn event_name(observation: &PollResult) -> &'static str {
    match observation {
        PollResult::Running => "running",
        PollResult::Complete(_) => "complete",
        PollResult::Failed => "failed",
        PollResult::Error(_) => "error",
    }
}
