//! Repository HTTP handlers
//!
//! Thin wrappers around [`crate::services::RepositoryService`]; they only map
//! requests to service calls and results to responses.

use axum::{
    Json,
    extract::{Query, State},
    response::Response,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::models::ProviderKind;
use crate::web::{
    AppState,
    responses::{handle_created, handle_result},
};

/// Request DTO for tracking an existing working tree
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddRepositoryRequest {
    pub repo_url: String,
    /// Directory the `owner/name` working tree lives under
    #[serde(alias = "basePath")]
    pub path: String,
    #[serde(default)]
    pub schedule: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloneRepositoryRequest {
    pub repo_url: String,
    pub base_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClonedRepository {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryPathRequest {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SwitchProviderRequest {
    pub path: String,
    pub provider: ProviderKind,
}

/// `?path=` query shared by several endpoints
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PathQuery {
    /// Repository path; made absolute before lookup
    #[serde(default)]
    pub path: String,
}

#[utoipa::path(
    get,
    path = "/repositories",
    tag = "repositories",
    responses(
        (status = 200, description = "Every tracked repository"),
    )
)]
pub async fn list_repositories(State(state): State<AppState>) -> Response {
    handle_result(Ok(state.service.list().await))
}

#[utoipa::path(
    post,
    path = "/repositories",
    tag = "repositories",
    request_body = AddRepositoryRequest,
    responses(
        (status = 201, description = "Repository tracked and scheduled"),
        (status = 400, description = "Invalid schedule or not a git working tree"),
        (status = 500, description = "Configuration could not be saved"),
    )
)]
pub async fn add_repository(
    State(state): State<AppState>,
    Json(request): Json<AddRepositoryRequest>,
) -> Response {
    handle_created(
        state
            .service
            .add(&request.repo_url, &request.path, request.schedule.as_deref())
            .await,
    )
}

#[utoipa::path(
    delete,
    path = "/repositories",
    tag = "repositories",
    params(PathQuery),
    responses(
        (status = 200, description = "Repository no longer tracked"),
        (status = 404, description = "Repository not found"),
    )
)]
pub async fn delete_repository(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Response {
    handle_result(state.service.delete(&query.path).await)
}

#[utoipa::path(
    post,
    path = "/repositories/update",
    tag = "repositories",
    request_body = RepositoryPathRequest,
    responses(
        (status = 200, description = "Fetched and refreshed git state"),
        (status = 404, description = "Repository not found"),
    )
)]
pub async fn update_repository(
    State(state): State<AppState>,
    Json(request): Json<RepositoryPathRequest>,
) -> Response {
    handle_result(state.service.update(&request.path).await)
}

#[utoipa::path(
    post,
    path = "/repositories/clone",
    tag = "repositories",
    request_body = CloneRepositoryRequest,
    responses(
        (status = 200, description = "Working tree cloned or fetched", body = ClonedRepository),
        (status = 400, description = "URL or base path missing"),
    )
)]
pub async fn clone_repository(
    State(state): State<AppState>,
    Json(request): Json<CloneRepositoryRequest>,
) -> Response {
    let result = state
        .service
        .clone_repository(&request.repo_url, &request.base_path)
        .await
        .map(|path| ClonedRepository { path });
    handle_result(result)
}

#[utoipa::path(
    post,
    path = "/repositories/sync",
    tag = "repositories",
    params(PathQuery),
    responses(
        (status = 200, description = "Repository synced"),
        (status = 404, description = "Repository not found"),
        (status = 500, description = "Fetch failed"),
    )
)]
pub async fn sync_repository(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Response {
    handle_result(state.service.sync_now(&query.path).await)
}

#[utoipa::path(
    post,
    path = "/repositories/provider",
    tag = "repositories",
    request_body = SwitchProviderRequest,
    responses(
        (status = 200, description = "Provider switched"),
        (status = 404, description = "Repository not found"),
    )
)]
pub async fn switch_provider(
    State(state): State<AppState>,
    Json(request): Json<SwitchProviderRequest>,
) -> Response {
    handle_result(
        state
            .service
            .switch_provider(&request.path, request.provider)
            .await,
    )
}
