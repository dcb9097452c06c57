//! Health check HTTP handler

use axum::{extract::State, response::Response};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::web::{AppState, responses::handle_result};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub scheduler_running: bool,
    pub repositories: usize,
    pub scheduled_tasks: usize,
}

/// Liveness plus a summary of what the service is tracking
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let service = &state.service;
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        scheduler_running: service.scheduler().is_running().await,
        repositories: service.registry().len().await,
        scheduled_tasks: service.scheduled_tasks().await.len(),
    };
    handle_result(Ok(response))
}
