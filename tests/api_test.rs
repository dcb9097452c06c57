//! HTTP API integration tests
//!
//! Drive the full router against a real `git` working tree in a temporary
//! directory. Tests return early when no `git` binary is available.

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{Value, json};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

use repo_sync::{
    config::Config,
    git::{CommandGit, GitBackend},
    registry::ResourceRegistry,
    remote::ProviderFactory,
    scheduling::Scheduler,
    services::{MemoryConfigPersistence, RepositoryService},
    web::{AppState, create_router},
};

const URL: &str = "https://github.com/acme/widgets.git";

struct TestApp {
    server: TestServer,
    persistence: Arc<MemoryConfigPersistence>,
    base: String,
    path: String,
    _dir: TempDir,
}

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn init_working_tree(path: &Path) {
    std::fs::create_dir_all(path).unwrap();
    let run = |args: &[&str]| {
        let status = Command::new("git")
            .arg("-C")
            .arg(path)
            .args(args)
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    };
    run(&["init", "-q", "-b", "main"]);
    run(&["config", "user.email", "dev@example.com"]);
    run(&["config", "user.name", "Dev"]);
    run(&["config", "commit.gpgsign", "false"]);
    std::fs::write(path.join("README.md"), "widgets\n").unwrap();
    run(&["add", "README.md"]);
    run(&["commit", "-q", "-m", "Initial commit"]);
}

fn create_test_app() -> Option<TestApp> {
    if !git_available() {
        return None;
    }
    let dir = TempDir::new().unwrap();
    let working_tree = dir.path().join("acme/widgets");
    init_working_tree(&working_tree);

    let config = Config::default();
    let git: Arc<dyn GitBackend> = Arc::new(CommandGit::new("git", None));
    let providers = ProviderFactory::new(&config.remote, git.clone()).unwrap();
    let persistence = Arc::new(MemoryConfigPersistence::new());
    let service = Arc::new(RepositoryService::new(
        config,
        ResourceRegistry::new(),
        Scheduler::new(chrono_tz::UTC),
        git,
        providers,
        persistence.clone(),
    ));

    let server = TestServer::new(create_router(AppState { service })).unwrap();
    Some(TestApp {
        server,
        persistence,
        base: dir.path().to_string_lossy().into_owned(),
        path: working_tree.to_string_lossy().into_owned(),
        _dir: dir,
    })
}

async fn add_repository(app: &TestApp) -> Value {
    let response = app
        .server
        .post("/api/v1/repositories")
        .json(&json!({
            "repoUrl": URL,
            "path": app.base,
            "schedule": "*/15 * * * *"
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()
}

#[tokio::test]
async fn test_health_and_openapi() {
    let Some(app) = create_test_app() else {
        return;
    };

    let health = app.server.get("/health").await;
    health.assert_status_ok();
    let body = health.json::<Value>();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["repositories"], 0);

    let spec = app.server.get("/api/openapi.json").await;
    spec.assert_status_ok();
    assert!(spec.json::<Value>()["paths"]["/repositories"].is_object());
}

#[tokio::test]
async fn test_repository_lifecycle() {
    let Some(app) = create_test_app() else {
        return;
    };

    let added = add_repository(&app).await;
    assert_eq!(added["data"]["path"], app.path.as_str());
    assert_eq!(added["data"]["remotePath"], "acme/widgets");
    assert_eq!(added["data"]["provider"], "local");
    assert_eq!(added["data"]["state"]["branch"], "main");

    let listed = app.server.get("/api/v1/repositories").await.json::<Value>();
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let schedules = app.server.get("/api/v1/schedules").await.json::<Value>();
    assert_eq!(schedules["data"][0]["key"], app.path.as_str());
    assert_eq!(schedules["data"][0]["schedule"], "*/15 * * * *");

    let update = app
        .server
        .post("/api/v1/repositories/update")
        .json(&json!({ "path": app.path }))
        .await;
    update.assert_status_ok();
    assert_eq!(update.json::<Value>()["data"]["clean"], true);

    let deleted = app
        .server
        .delete("/api/v1/repositories")
        .add_query_param("path", &app.path)
        .await;
    deleted.assert_status_ok();
    assert!(app.persistence.last().unwrap().repositories.is_empty());

    app.server
        .delete("/api/v1/repositories")
        .add_query_param("path", &app.path)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_add_rejects_invalid_input() {
    let Some(app) = create_test_app() else {
        return;
    };

    let bad_schedule = app
        .server
        .post("/api/v1/repositories")
        .json(&json!({ "repoUrl": URL, "path": app.base, "schedule": "*/61 * * * *" }))
        .await;
    bad_schedule.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(bad_schedule.json::<Value>()["success"], false);

    app.server
        .post("/api/v1/repositories")
        .json(&json!({ "repoUrl": "https://github.com/acme/missing", "path": app.base }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.server
        .post("/api/v1/repositories/sync")
        .add_query_param("path", "/nowhere")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_local_issue_workflow() {
    let Some(app) = create_test_app() else {
        return;
    };
    add_repository(&app).await;

    let created = app
        .server
        .post("/api/v1/local/issues")
        .json(&json!({ "path": app.path, "title": "Crash on start", "body": "Stack trace" }))
        .await;
    created.assert_status(StatusCode::CREATED);
    let number = created.json::<Value>()["data"]["number"].as_u64().unwrap();

    let comment = app
        .server
        .post("/api/v1/local/comments")
        .json(&json!({
            "path": app.path,
            "resourceId": number,
            "resourceType": "issue",
            "body": "Reproduced on main"
        }))
        .await;
    comment.assert_status(StatusCode::CREATED);
    let comment_id = comment.json::<Value>()["data"]["id"].as_i64().unwrap();

    app.server
        .post("/api/v1/local/reactions")
        .json(&json!({ "path": app.path, "commentId": comment_id, "reaction": "+1" }))
        .await
        .assert_status_ok();
    app.server
        .post("/api/v1/local/issues/labels")
        .json(&json!({ "path": app.path, "issueNumber": number, "label": "bug" }))
        .await
        .assert_status_ok();
    app.server
        .post("/api/v1/local/issues/state")
        .json(&json!({ "path": app.path, "issueNumber": number, "state": "merged" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    app.server
        .post("/api/v1/local/issues/state")
        .json(&json!({ "path": app.path, "issueNumber": number, "state": "closed" }))
        .await
        .assert_status_ok();

    let overview = app
        .server
        .get("/api/v1/local")
        .add_query_param("path", &app.path)
        .await
        .json::<Value>();
    let issue = &overview["data"]["issues"][0];
    assert_eq!(issue["state"], "closed");
    assert_eq!(issue["labels"], json!(["bug"]));
    assert_eq!(issue["comments"][0]["reactions"]["+1"], 1);

    let synced = app
        .server
        .post("/api/v1/repositories/sync")
        .add_query_param("path", &app.path)
        .await;
    // No remote is configured, so the fetch is a no-op that succeeds
    synced.assert_status_ok();
    assert_eq!(synced.json::<Value>()["data"]["status"], "synced");

    app.server
        .get("/api/v1/local/diff")
        .add_query_param("path", &app.path)
        .add_query_param("pr", 42)
        .await
        .assert_status(StatusCode::NOT_FOUND);

    app.server
        .delete("/api/v1/local/issues")
        .json(&json!({ "path": app.path, "issueNumber": number }))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_settings_and_github_token() {
    let Some(app) = create_test_app() else {
        return;
    };
    add_repository(&app).await;

    app.server
        .get("/api/v1/github/issues")
        .add_query_param("path", &app.path)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    app.server
        .get("/api/v1/github/repositories")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let updated = app
        .server
        .put("/api/v1/settings")
        .json(&json!({ "githubToken": "ghp_secret", "defaultProvider": "github" }))
        .await;
    updated.assert_status_ok();

    let settings = app.server.get("/api/v1/settings").await.json::<Value>();
    assert_eq!(settings["data"]["githubTokenConfigured"], true);
    assert_eq!(settings["data"]["defaultProvider"], "github");
    assert!(!settings.to_string().contains("ghp_secret"));

    let switched = app
        .server
        .post("/api/v1/repositories/provider")
        .json(&json!({ "path": app.path, "provider": "github" }))
        .await;
    switched.assert_status_ok();
    assert_eq!(switched.json::<Value>()["data"]["provider"], "github");
    assert_eq!(
        app.persistence.last().unwrap().settings.github_token,
        "ghp_secret"
    );
}
