use crate::api::HostState;
use crate::config::DeploymentMode;
use crate::lifecycle::LifecycleState;
use crate::world::WorldSummary;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

/// GET /api/status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub mode: DeploymentMode,
    /// None in standalone mode
    pub lifecycle: Option<LifecycleState>,
    pub accepting: bool,
    pub draining: bool,
    pub sessions: usize,
    pub worlds: Vec<WorldSummary>,
}

/// GET /healthcheck - liveness check
pub async fn healthcheck() -> StatusCode {
    StatusCode::OK
}

/// GET /api/status
pub async fn status(State(state): State<Arc<HostState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        mode: state.mode,
        lifecycle: state.lifecycle.as_ref().map(|l| l.state()),
        accepting: state.registry.is_accepting(),
        draining: state.sessions.is_draining(),
        sessions: state.sessions.session_count(),
        worlds: state.registry.summaries(),
    })
}

pub fn create_status_router(state: Arc<HostState>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/api/status", get(status))
        .with_state(state)
}
