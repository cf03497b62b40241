// Health and status endpoints plus the WebSocket signaling endpoint

pub mod status;
pub mod websocket;

pub use status::{create_status_router, StatusResponse};
pub use websocket::{create_ws_router, ws_handler};

use crate::config::DeploymentMode;
use crate::lifecycle::LifecycleController;
use crate::session::SessionManager;
use crate::world::WorldRegistry;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[cfg(test)]
mod tests;

/// Shared state for every HTTP handler
#[derive(Clone)]
pub struct HostState {
    pub sessions: Arc<SessionManager>,
    pub registry: Arc<WorldRegistry>,
    /// Absent in standalone mode
    pub lifecycle: Option<Arc<LifecycleController>>,
    pub mode: DeploymentMode,
}

/// Full host router: signaling plus health and status
pub fn create_router(state: Arc<HostState>) -> Router {
    Router::new()
        .merge(create_ws_router(Arc::clone(&state)))
        .merge(create_status_router(state))
        .layer(CorsLayer::permissive())
}
