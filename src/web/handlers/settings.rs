//! Settings and schedule HTTP handlers

use axum::{Json, extract::State, response::Response};

use crate::services::SettingsUpdate;
use crate::web::{AppState, responses::handle_result};

#[utoipa::path(
    get,
    path = "/settings",
    tag = "settings",
    responses(
        (status = 200, description = "Current settings; the token is reported only as configured or not"),
    )
)]
pub async fn get_settings(State(state): State<AppState>) -> Response {
    handle_result(Ok(state.service.get_settings().await))
}

#[utoipa::path(
    put,
    path = "/settings",
    tag = "settings",
    request_body = SettingsUpdate,
    responses(
        (status = 200, description = "Settings updated and saved"),
        (status = 500, description = "Configuration could not be saved"),
    )
)]
pub async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Response {
    handle_result(state.service.update_settings(update).await)
}

#[utoipa::path(
    get,
    path = "/schedules",
    tag = "schedules",
    responses(
        (status = 200, description = "Scheduled sync tasks with their next fire time"),
    )
)]
pub async fn list_schedules(State(state): State<AppState>) -> Response {
    handle_result(Ok(state.service.scheduled_tasks().await))
}
