//! Web layer module
//!
//! The HTTP interface of the service. Handlers are thin and delegate to
//! [`RepositoryService`]; errors are mapped to status codes in
//! [`responses::handle_error`].

use anyhow::Result;
use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::WebConfig;
use crate::services::RepositoryService;

pub mod handlers;
pub mod openapi;
pub mod responses;

pub use responses::{ApiResponse, handle_error, handle_result};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RepositoryService>,
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(config: &WebConfig, service: Arc<RepositoryService>) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
        Ok(Self {
            app: create_router(AppState { service }),
            addr,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until `shutdown` is cancelled, then drain in-flight requests
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.addr, e))?;
        info!("Web server listening on http://{}", self.addr);

        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Web server received cancellation signal, shutting down gracefully");
            })
            .await?;
        Ok(())
    }
}

/// Router with every route and middleware applied
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", api_v1_routes())
        .merge(SwaggerUi::new("/docs").url("/api/openapi.json", openapi::get_openapi_spec()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn api_v1_routes() -> Router<AppState> {
    use handlers::{health, repositories, settings, tracker};

    Router::new()
        .route(
            "/repositories",
            get(repositories::list_repositories)
                .post(repositories::add_repository)
                .delete(repositories::delete_repository),
        )
        .route("/repositories/update", post(repositories::update_repository))
        .route("/repositories/clone", post(repositories::clone_repository))
        .route("/repositories/sync", post(repositories::sync_repository))
        .route("/repositories/provider", post(repositories::switch_provider))
        .route("/github/issues", get(tracker::github_issues))
        .route("/github/repositories", get(tracker::github_repositories))
        .route("/local", get(tracker::overview))
        .route(
            "/local/issues",
            post(tracker::create_issue)
                .put(tracker::update_issue)
                .delete(tracker::delete_issue),
        )
        .route("/local/issues/state", post(tracker::update_issue_state))
        .route("/local/issues/labels", post(tracker::add_label))
        .route("/local/comments", post(tracker::add_comment))
        .route("/local/reactions", post(tracker::add_reaction))
        .route("/local/diff", get(tracker::pull_request_diff))
        .route(
            "/local/pull-requests/state",
            post(tracker::update_pull_request_state),
        )
        .route("/local/pull-requests", axum::routing::delete(tracker::delete_pull_request))
        .route(
            "/settings",
            get(settings::get_settings).put(settings::update_settings),
        )
        .route("/schedules", get(settings::list_schedules))
        .route("/health", get(health::health_check))
}
