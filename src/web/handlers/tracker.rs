//! Issue tracker HTTP handlers
//!
//! The `/local` endpoints work against whichever provider backs the
//! repository; the `/github` endpoints additionally require a configured token.

use axum::{
    Json,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::repositories::PathQuery;
use crate::models::{
    CommentTarget, NewComment, NewIssue, PullRequestState, Reaction, RemoteRepository,
};
use crate::web::{
    AppState,
    responses::{handle_created, handle_error, handle_result},
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateIssueRequest {
    pub path: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatedIssue {
    pub number: u64,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateIssueRequest {
    pub path: String,
    pub issue_number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    pub path: String,
    pub issue_number: u64,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssueStateRequest {
    pub path: String,
    pub issue_number: u64,
    /// `open` or `closed`
    pub state: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssueLabelRequest {
    pub path: String,
    pub issue_number: u64,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommentRequest {
    pub path: String,
    pub resource_id: u64,
    pub resource_type: CommentTarget,
    pub body: String,
    #[serde(default)]
    pub diff_hunk: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRequest {
    pub path: String,
    pub comment_id: i64,
    pub reaction: Reaction,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestStateRequest {
    pub path: String,
    pub pr_number: u64,
    pub state: PullRequestState,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestRequest {
    pub path: String,
    pub pr_number: u64,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DiffQuery {
    #[serde(default)]
    pub path: String,
    /// Pull request number
    pub pr: u64,
}

#[utoipa::path(
    get,
    path = "/github/issues",
    tag = "github",
    params(PathQuery),
    responses(
        (status = 200, description = "Open issues, refreshed from GitHub"),
        (status = 400, description = "GitHub token not configured"),
        (status = 404, description = "Repository not found"),
        (status = 502, description = "GitHub unavailable"),
    )
)]
pub async fn github_issues(State(state): State<AppState>, Query(query): Query<PathQuery>) -> Response {
    handle_result(state.service.github_issues(&query.path).await)
}

#[utoipa::path(
    get,
    path = "/github/repositories",
    tag = "github",
    responses(
        (status = 200, description = "Repositories the token can access", body = [RemoteRepository]),
        (status = 400, description = "GitHub token not configured"),
        (status = 401, description = "Token rejected by GitHub"),
        (status = 502, description = "GitHub unavailable"),
    )
)]
pub async fn github_repositories(State(state): State<AppState>) -> Response {
    handle_result(state.service.github_repositories().await)
}

#[utoipa::path(
    get,
    path = "/local",
    tag = "local",
    params(PathQuery),
    responses(
        (status = 200, description = "Issues and pull requests of the repository"),
        (status = 404, description = "Repository not found"),
    )
)]
pub async fn overview(State(state): State<AppState>, Query(query): Query<PathQuery>) -> Response {
    handle_result(state.service.local_overview(&query.path).await)
}

#[utoipa::path(
    post,
    path = "/local/issues",
    tag = "local",
    request_body = CreateIssueRequest,
    responses(
        (status = 201, description = "Issue created", body = CreatedIssue),
        (status = 404, description = "Repository not found"),
    )
)]
pub async fn create_issue(
    State(state): State<AppState>,
    Json(request): Json<CreateIssueRequest>,
) -> Response {
    let issue = NewIssue {
        title: request.title,
        body: request.body,
        labels: request.labels,
    };
    let result = state
        .service
        .create_issue(&request.path, issue)
        .await
        .map(|number| CreatedIssue { number });
    handle_created(result)
}

#[utoipa::path(
    put,
    path = "/local/issues",
    tag = "local",
    request_body = UpdateIssueRequest,
    responses(
        (status = 200, description = "Issue updated"),
        (status = 404, description = "Repository or issue not found"),
    )
)]
pub async fn update_issue(
    State(state): State<AppState>,
    Json(request): Json<UpdateIssueRequest>,
) -> Response {
    handle_result(
        state
            .service
            .update_issue(&request.path, request.issue_number, &request.title, &request.body)
            .await,
    )
}

#[utoipa::path(
    delete,
    path = "/local/issues",
    tag = "local",
    request_body = IssueRequest,
    responses(
        (status = 200, description = "Issue deleted"),
        (status = 404, description = "Repository or issue not found"),
    )
)]
pub async fn delete_issue(State(state): State<AppState>, Json(request): Json<IssueRequest>) -> Response {
    handle_result(
        state
            .service
            .delete_issue(&request.path, request.issue_number)
            .await,
    )
}

#[utoipa::path(
    post,
    path = "/local/issues/state",
    tag = "local",
    request_body = IssueStateRequest,
    responses(
        (status = 200, description = "Issue state changed"),
        (status = 400, description = "State is neither open nor closed"),
    )
)]
pub async fn update_issue_state(
    State(state): State<AppState>,
    Json(request): Json<IssueStateRequest>,
) -> Response {
    handle_result(
        state
            .service
            .update_issue_state(&request.path, request.issue_number, &request.state)
            .await,
    )
}

#[utoipa::path(
    post,
    path = "/local/issues/labels",
    tag = "local",
    request_body = IssueLabelRequest,
    responses(
        (status = 200, description = "Label added"),
    )
)]
pub async fn add_label(
    State(state): State<AppState>,
    Json(request): Json<IssueLabelRequest>,
) -> Response {
    handle_result(
        state
            .service
            .add_label(&request.path, request.issue_number, &request.label)
            .await,
    )
}

#[utoipa::path(
    post,
    path = "/local/comments",
    tag = "local",
    request_body = CommentRequest,
    responses(
        (status = 201, description = "Comment created"),
        (status = 404, description = "Repository, issue or pull request not found"),
    )
)]
pub async fn add_comment(
    State(state): State<AppState>,
    Json(request): Json<CommentRequest>,
) -> Response {
    let comment = NewComment {
        body: request.body,
        diff_hunk: request.diff_hunk.filter(|hunk| !hunk.is_empty()),
    };
    handle_created(
        state
            .service
            .add_comment(&request.path, request.resource_type, request.resource_id, comment)
            .await,
    )
}

#[utoipa::path(
    post,
    path = "/local/reactions",
    tag = "local",
    request_body = ReactionRequest,
    responses(
        (status = 200, description = "Reaction added"),
        (status = 404, description = "Comment not found"),
    )
)]
pub async fn add_reaction(
    State(state): State<AppState>,
    Json(request): Json<ReactionRequest>,
) -> Response {
    handle_result(
        state
            .service
            .add_reaction(&request.path, request.comment_id, request.reaction)
            .await,
    )
}

/// Plain-text unified diff of a pull request
#[utoipa::path(
    get,
    path = "/local/diff",
    tag = "local",
    params(DiffQuery),
    responses(
        (status = 200, description = "Unified diff", content_type = "text/plain"),
        (status = 404, description = "Repository or pull request not found"),
    )
)]
pub async fn pull_request_diff(
    State(state): State<AppState>,
    Query(query): Query<DiffQuery>,
) -> Response {
    match state.service.pr_diff(&query.path, query.pr).await {
        Ok(diff) => ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], diff).into_response(),
        Err(e) => handle_error(e),
    }
}

#[utoipa::path(
    post,
    path = "/local/pull-requests/state",
    tag = "local",
    request_body = PullRequestStateRequest,
    responses(
        (status = 200, description = "Pull request state changed"),
    )
)]
pub async fn update_pull_request_state(
    State(state): State<AppState>,
    Json(request): Json<PullRequestStateRequest>,
) -> Response {
    handle_result(
        state
            .service
            .update_pr_state(&request.path, request.pr_number, request.state)
            .await,
    )
}

#[utoipa::path(
    delete,
    path = "/local/pull-requests",
    tag = "local",
    request_body = PullRequestRequest,
    responses(
        (status = 200, description = "Pull request deleted"),
    )
)]
pub async fn delete_pull_request(
    State(state): State<AppState>,
    Json(request): Json<PullRequestRequest>,
) -> Response {
    handle_result(
        state
            .service
            .delete_pr(&request.path, request.pr_number)
            .await,
    )
}
