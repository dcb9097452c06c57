//! Remote issue tracker providers
//!
//! Every provider is bound to one repository when it is built and exposes
//! the same capability set, so sync actions and request handlers never care
//! which tracker backs a repository.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::RemoteConfig;
use crate::errors::{ConfigError, ProviderResult};
use crate::git::GitBackend;
use crate::models::{
    Comment, Issue, IssueFilter, IssueState, NewComment, NewIssue, ProviderKind, PullRequest,
    PullRequestState, Reaction,
};

pub mod github;
pub mod local;

pub use github::{GitHubClient, GitHubProvider};
pub use local::LocalProvider;

#[async_trait]
pub trait RemoteProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn fetch_issues(&self, filter: &IssueFilter) -> ProviderResult<Vec<Issue>>;

    /// Open pull requests, optionally restricted to those carrying `label`
    async fn fetch_pull_requests(&self, label: Option<&str>) -> ProviderResult<Vec<PullRequest>>;

    /// Returns the new issue number
    async fn create_issue(&self, issue: NewIssue) -> ProviderResult<u64>;

    async fn create_issue_comment(&self, number: u64, comment: NewComment)
    -> ProviderResult<Comment>;

    async fn create_pr_comment(&self, number: u64, comment: NewComment) -> ProviderResult<Comment>;

    async fn add_comment_reaction(&self, comment_id: i64, reaction: Reaction)
    -> ProviderResult<()>;

    /// Unified diff of a pull request
    async fn fetch_diffs(&self, number: u64) -> ProviderResult<String>;

    async fn add_label_to_issue(&self, number: u64, label: &str) -> ProviderResult<()>;

    async fn update_issue_state(&self, number: u64, state: IssueState) -> ProviderResult<()>;

    async fn update_pull_request_state(
        &self,
        number: u64,
        state: PullRequestState,
    ) -> ProviderResult<()>;

    async fn delete_issue(&self, number: u64) -> ProviderResult<()>;

    async fn delete_pull_request(&self, number: u64) -> ProviderResult<()>;

    async fn update_issue(&self, number: u64, title: &str, body: &str) -> ProviderResult<()>;
}

/// Builds providers bound to a single repository
///
/// Local providers built for the same working tree share one store lock, so
/// an instance replaced by a provider switch still serializes with its
/// successor.
#[derive(Clone)]
pub struct ProviderFactory {
    http: reqwest::Client,
    github_api_url: String,
    git: Arc<dyn GitBackend>,
    store_locks: Arc<StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl ProviderFactory {
    pub fn new(config: &RemoteConfig, git: Arc<dyn GitBackend>) -> Result<Self, ConfigError> {
        let timeout = config.request_timeout()?;
        Ok(Self {
            http: build_http_client(&config.user_agent, timeout)?,
            github_api_url: config.github_api_url.trim_end_matches('/').to_string(),
            git,
            store_locks: Arc::new(StdMutex::new(HashMap::new())),
        })
    }

    /// Account-level GitHub access with the shared HTTP client
    pub fn github_client(&self, token: Option<&str>) -> GitHubClient {
        GitHubClient::new(
            self.http.clone(),
            &self.github_api_url,
            token.map(str::to_string),
        )
    }

    fn store_lock(&self, store_path: PathBuf) -> Arc<Mutex<()>> {
        let mut locks = self.store_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(store_path).or_default().clone()
    }

    pub fn build(
        &self,
        kind: ProviderKind,
        repo_path: &str,
        remote_path: &str,
        token: Option<&str>,
    ) -> Arc<dyn RemoteProvider> {
        debug!(
            "Building {} provider for {} ({})",
            kind, repo_path, remote_path
        );
        match kind {
            ProviderKind::GitHub => {
                Arc::new(GitHubProvider::new(self.github_client(token), remote_path))
            }
            ProviderKind::Local => {
                let root = PathBuf::from(repo_path);
                let lock = self.store_lock(LocalProvider::store_path_for(&root));
                Arc::new(LocalProvider::with_lock(root, self.git.clone(), lock))
            }
        }
    }
}

fn build_http_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigError::Invalid {
            field: "remote".to_string(),
            message: format!("failed to build HTTP client: {e}"),
        })
}
