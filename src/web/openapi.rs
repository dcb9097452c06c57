//! OpenAPI documentation generation using utoipa

use utoipa::OpenApi;

use crate::web::handlers;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "repo-sync API",
        description = "Track git repositories, sync them on cron schedules and manage their issues and pull requests.",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/api/v1", description = "API Version 1"),
    ),
    tags(
        (name = "repositories", description = "Tracked repositories and their sync schedules"),
        (name = "github", description = "GitHub-backed issue and repository listing"),
        (name = "local", description = "Issue and pull request management on the repository's tracker"),
        (name = "settings", description = "Runtime settings"),
        (name = "schedules", description = "Scheduled sync tasks"),
        (name = "health", description = "Service health"),
    ),
    components(
        schemas(
            crate::models::RepositoryView,
            crate::models::RemoteRepository,
            crate::models::ProviderKind,
            crate::models::SyncStatus,
            crate::models::Issue,
            crate::models::IssueState,
            crate::models::PullRequest,
            crate::models::PullRequestState,
            crate::models::Comment,
            crate::models::Reactions,
            crate::models::Reaction,
            crate::models::CommentTarget,
            crate::git::RepositoryState,
            crate::scheduling::TaskSnapshot,
            crate::services::SettingsView,
            crate::services::SettingsUpdate,
            crate::services::TrackerOverview,
            handlers::repositories::AddRepositoryRequest,
            handlers::repositories::CloneRepositoryRequest,
            handlers::repositories::ClonedRepository,
            handlers::repositories::RepositoryPathRequest,
            handlers::repositories::SwitchProviderRequest,
            handlers::tracker::CreateIssueRequest,
            handlers::tracker::CreatedIssue,
            handlers::tracker::UpdateIssueRequest,
            handlers::tracker::IssueRequest,
            handlers::tracker::IssueStateRequest,
            handlers::tracker::IssueLabelRequest,
            handlers::tracker::CommentRequest,
            handlers::tracker::ReactionRequest,
            handlers::tracker::PullRequestStateRequest,
            handlers::tracker::PullRequestRequest,
            handlers::health::HealthResponse,
        )
    ),
    paths(
        handlers::repositories::list_repositories,
        handlers::repositories::add_repository,
        handlers::repositories::delete_repository,
        handlers::repositories::update_repository,
        handlers::repositories::clone_repository,
        handlers::repositories::sync_repository,
        handlers::repositories::switch_provider,
        handlers::tracker::github_issues,
        handlers::tracker::github_repositories,
        handlers::tracker::overview,
        handlers::tracker::create_issue,
        handlers::tracker::update_issue,
        handlers::tracker::delete_issue,
        handlers::tracker::update_issue_state,
        handlers::tracker::add_label,
        handlers::tracker::add_comment,
        handlers::tracker::add_reaction,
        handlers::tracker::pull_request_diff,
        handlers::tracker::update_pull_request_state,
        handlers::tracker::delete_pull_request,
        handlers::settings::get_settings,
        handlers::settings::update_settings,
        handlers::settings::list_schedules,
        handlers::health::health_check,
    )
)]
pub struct ApiDoc;

/// OpenAPI document with the crate version filled in
pub fn get_openapi_spec() -> utoipa::openapi::OpenApi {
    let mut openapi = ApiDoc::openapi();
    openapi.info.version = env!("CARGO_PKG_VERSION").to_string();
    openapi
}
