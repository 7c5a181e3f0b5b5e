use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::state::SharedState;

/// Simple health-check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub chains_configured: usize,
    pub chains_ready: usize,
}

/// `GET /health`
///
/// Returns a basic JSON document indicating liveness and how many chains
/// have finished bootstrapping.
pub async fn health(State(state): State<SharedState>) -> (StatusCode, Json<HealthResponse>) {
    let chains_ready = state.monitors.read().await.len();
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            chains_configured: state.chains.len(),
            chains_ready,
        }),
    )
}
