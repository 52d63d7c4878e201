pub mod analyze;
pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Analysis API
        .route("/api/analyze", post(analyze::handle_analyze))
        .route(
            "/api/analyze/upload",
            post(analyze::handle_upload).layer(DefaultBodyLimit::max(analyze::UPLOAD_BODY_LIMIT)),
        )
        .route("/api/analyze/stream", post(analyze::handle_stream))
        .route("/api/status", get(analyze::handle_status))
        .with_state(state)
}
