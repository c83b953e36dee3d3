//! `GET /health`: liveness, no credential required.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Busy audit workers out of the configured pool size.
    pub audit_workers_busy: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        audit_workers_busy: state.orchestrator.active_worker_count(),
    })
}
