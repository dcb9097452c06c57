//! Repository Service
//!
//! Business logic behind the repository, tracker and settings endpoints.
//! Every operation addresses a repository by path; paths are canonicalized
//! before they are used as registry or scheduler keys.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::persistence::ConfigPersistence;
use crate::config::{Config, RepositoryConfig, Settings, default_schedule};
use crate::errors::{AppError, AppResult};
use crate::git::{GitBackend, RepositoryState};
use crate::models::{
    Comment, CommentTarget, Issue, IssueFilter, IssueState, NewComment, NewIssue, ProviderKind,
    PullRequest, PullRequestState, PublishedRepository, Reaction, RemoteRepository, Repository,
    RepositoryView,
};
use crate::registry::ResourceRegistry;
use crate::remote::{ProviderFactory, RemoteProvider};
use crate::scheduling::{ScheduleExpression, Scheduler, TaskSnapshot};
use crate::sync::{SyncAction, sync_repository};
use crate::utils::{canonical_key, remote_path_from_url};

/// Issues and pull requests of one repository
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackerOverview {
    pub path: String,
    pub provider: ProviderKind,
    pub issues: Vec<Issue>,
    pub pull_requests: Vec<PullRequest>,
}

/// Settings as exposed over HTTP; the token itself is never returned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub github_token_configured: bool,
    pub default_provider: ProviderKind,
}

impl From<&Settings> for SettingsView {
    fn from(settings: &Settings) -> Self {
        Self {
            github_token_configured: settings.token().is_some(),
            default_provider: settings.default_provider,
        }
    }
}

/// Partial settings update; absent fields keep their current value
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub github_token: Option<String>,
    pub default_provider: Option<ProviderKind>,
}

pub struct RepositoryService {
    registry: ResourceRegistry<Repository>,
    scheduler: Scheduler,
    git: Arc<dyn GitBackend>,
    providers: ProviderFactory,
    config: RwLock<Config>,
    persistence: Arc<dyn ConfigPersistence>,
}

impl RepositoryService {
    pub fn new(
        config: Config,
        registry: ResourceRegistry<Repository>,
        scheduler: Scheduler,
        git: Arc<dyn GitBackend>,
        providers: ProviderFactory,
        persistence: Arc<dyn ConfigPersistence>,
    ) -> Self {
        Self {
            registry,
            scheduler,
            git,
            providers,
            config: RwLock::new(config),
            persistence,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> &ResourceRegistry<Repository> {
        &self.registry
    }

    /// Last published view of every tracked repository, ordered by path
    ///
    /// Never waits for a running sync.
    pub async fn list(&self) -> Vec<RepositoryView> {
        self.registry
            .snapshots()
            .await
            .into_iter()
            .map(|published| published.view)
            .collect()
    }

    pub async fn get(&self, path: &str) -> AppResult<RepositoryView> {
        let key = key_for(path)?;
        Ok(self.registry.snapshot(&key).await?.view)
    }

    /// Start tracking the working tree of `repo_url` under `base_path`
    ///
    /// An empty schedule falls back to the default one. The working tree must
    /// already exist; use [`RepositoryService::clone_repository`] first.
    pub async fn add(
        &self,
        repo_url: &str,
        base_path: &str,
        schedule: Option<&str>,
    ) -> AppResult<RepositoryView> {
        if repo_url.trim().is_empty() {
            return Err(AppError::validation("Repository URL is required"));
        }
        let schedule = match schedule.map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => default_schedule(),
        };
        ScheduleExpression::parse(&schedule)?;

        let remote_path = remote_path_from_url(repo_url);
        let key = key_for(&Path::new(base_path).join(&remote_path).to_string_lossy())?;
        self.git.open(Path::new(&key)).await?;

        let (kind, token) = self.provider_settings().await;
        let remote = self.build_remote(kind, &key, &remote_path, token.as_deref());
        let mut repository = Repository::new(key.clone(), schedule.clone(), remote_path, remote);
        match self.git.status(Path::new(&key)).await {
            Ok(state) => repository.state = Some(state),
            Err(e) => warn!("Could not read status of {}: {}", key, e),
        }

        // The schedule is registered first so a rejected one leaves any
        // existing registration of this path untouched.
        self.scheduler
            .add_task(key.clone(), &schedule, self.sync_action(&key))
            .await?;
        self.registry.insert(repository).await;
        info!("Added repository {} with schedule '{}'", key, schedule);

        self.persist().await?;
        self.get(&key).await
    }

    /// Fetch and refresh the git state of a repository
    ///
    /// A failed fetch is logged; the status refresh still runs.
    pub async fn update(&self, path: &str) -> AppResult<RepositoryState> {
        let key = key_for(path)?;
        let mut repository = self.registry.checkout(&key).await?;
        let working_tree = PathBuf::from(&key);

        if let Err(e) = self.git.fetch(&working_tree).await {
            warn!("Fetch failed for {}: {}", key, e);
        }
        let state = self.git.status(&working_tree).await?;
        repository.state = Some(state.clone());
        repository.publish().await?;
        Ok(state)
    }

    /// Clone `repo_url` under `base_path`, or fetch when the clone already exists
    ///
    /// Returns the canonical path of the working tree. The clone is not tracked
    /// until it is added.
    pub async fn clone_repository(&self, repo_url: &str, base_path: &str) -> AppResult<String> {
        if repo_url.trim().is_empty() || base_path.trim().is_empty() {
            return Err(AppError::validation(
                "Repository URL and base path are required",
            ));
        }
        tokio::fs::create_dir_all(base_path)
            .await
            .map_err(|e| AppError::internal(format!("Error creating directory: {e}")))?;

        let key = key_for(
            &Path::new(base_path)
                .join(remote_path_from_url(repo_url))
                .to_string_lossy(),
        )?;
        self.git.upsert(repo_url, Path::new(&key)).await?;
        info!("Cloned {} into {}", repo_url, key);
        Ok(key)
    }

    /// Stop tracking a repository and cancel its schedule
    pub async fn delete(&self, path: &str) -> AppResult<()> {
        let key = key_for(path)?;
        if !self.registry.delete(&key).await {
            return Err(AppError::repository_not_found(key));
        }
        self.scheduler.remove_task(&key).await;
        info!("Repository deleted {}", key);
        self.persist().await
    }

    pub async fn sync_now(&self, path: &str) -> AppResult<RepositoryView> {
        let key = key_for(path)?;
        sync_repository(&self.registry, self.git.as_ref(), &key).await
    }

    /// Rebind a repository to another tracker using the current settings
    pub async fn switch_provider(
        &self,
        path: &str,
        provider: ProviderKind,
    ) -> AppResult<RepositoryView> {
        let key = key_for(path)?;
        let (_, token) = self.provider_settings().await;

        let mut repository = self.registry.checkout(&key).await?;
        let remote = self.build_remote(provider, &key, &repository.remote_path, token.as_deref());
        repository.switch_provider(remote);
        let view = repository.view();
        repository.publish().await?;
        info!("Switched {} to the {} provider", key, provider);

        self.persist().await?;
        Ok(view)
    }

    /// Refresh and return the open issues of a GitHub-backed repository
    pub async fn github_issues(&self, path: &str) -> AppResult<Vec<Issue>> {
        let key = key_for(path)?;
        let (_, token) = self.provider_settings().await;
        if token.is_none() {
            return Err(AppError::validation("GitHub token not configured"));
        }

        let mut repository = self.registry.checkout(&key).await?;
        let issues = repository.remote.fetch_issues(&IssueFilter::open()).await?;
        repository.issues = issues.clone();
        repository.publish().await?;
        Ok(issues)
    }

    /// Repositories the configured token can access on GitHub
    pub async fn github_repositories(&self) -> AppResult<Vec<RemoteRepository>> {
        let (_, token) = self.provider_settings().await;
        if token.is_none() {
            return Err(AppError::validation("GitHub token not configured"));
        }
        let repositories = self
            .providers
            .github_client(token.as_deref())
            .repositories()
            .await?;
        Ok(repositories)
    }

    /// Every issue and open pull request on the repository's tracker
    pub async fn local_overview(&self, path: &str) -> AppResult<TrackerOverview> {
        let (key, remote) = self.remote_for(path).await?;
        let issues = remote.fetch_issues(&IssueFilter::all()).await?;
        let pull_requests = remote.fetch_pull_requests(None).await?;
        Ok(TrackerOverview {
            path: key,
            provider: remote.kind(),
            issues,
            pull_requests,
        })
    }

    pub async fn create_issue(&self, path: &str, issue: NewIssue) -> AppResult<u64> {
        if issue.title.trim().is_empty() {
            return Err(AppError::validation("Issue title is required"));
        }
        let (key, remote) = self.remote_for(path).await?;
        let number = remote.create_issue(issue).await?;
        info!("Created issue #{} in {}", number, key);
        Ok(number)
    }

    pub async fn add_comment(
        &self,
        path: &str,
        target: CommentTarget,
        number: u64,
        comment: NewComment,
    ) -> AppResult<Comment> {
        let (_, remote) = self.remote_for(path).await?;
        let comment = match target {
            CommentTarget::Issue => remote.create_issue_comment(number, comment).await?,
            CommentTarget::PullRequest => remote.create_pr_comment(number, comment).await?,
        };
        Ok(comment)
    }

    pub async fn add_reaction(&self, path: &str, comment_id: i64, reaction: Reaction) -> AppResult<()> {
        let (_, remote) = self.remote_for(path).await?;
        remote.add_comment_reaction(comment_id, reaction).await?;
        Ok(())
    }

    pub async fn pr_diff(&self, path: &str, number: u64) -> AppResult<String> {
        let (_, remote) = self.remote_for(path).await?;
        Ok(remote.fetch_diffs(number).await?)
    }

    pub async fn add_label(&self, path: &str, number: u64, label: &str) -> AppResult<()> {
        let label = label.trim();
        if label.is_empty() {
            return Err(AppError::validation("Label is required"));
        }
        let (_, remote) = self.remote_for(path).await?;
        remote.add_label_to_issue(number, label).await?;
        Ok(())
    }

    /// Only `open` and `closed` are accepted
    pub async fn update_issue_state(&self, path: &str, number: u64, state: &str) -> AppResult<()> {
        let state = match state {
            "open" => IssueState::Open,
            "closed" => IssueState::Closed,
            _ => {
                return Err(AppError::validation(
                    "Invalid state. Must be 'open' or 'closed'",
                ));
            }
        };
        let (_, remote) = self.remote_for(path).await?;
        remote.update_issue_state(number, state).await?;
        Ok(())
    }

    pub async fn update_pr_state(
        &self,
        path: &str,
        number: u64,
        state: PullRequestState,
    ) -> AppResult<()> {
        let (_, remote) = self.remote_for(path).await?;
        remote.update_pull_request_state(number, state).await?;
        Ok(())
    }

    pub async fn delete_issue(&self, path: &str, number: u64) -> AppResult<()> {
        let (key, remote) = self.remote_for(path).await?;
        remote.delete_issue(number).await?;
        info!("Deleted issue #{} in {}", number, key);
        Ok(())
    }

    pub async fn delete_pr(&self, path: &str, number: u64) -> AppResult<()> {
        let (key, remote) = self.remote_for(path).await?;
        remote.delete_pull_request(number).await?;
        info!("Deleted pull request #{} in {}", number, key);
        Ok(())
    }

    pub async fn update_issue(&self, path: &str, number: u64, title: &str, body: &str) -> AppResult<()> {
        if title.trim().is_empty() {
            return Err(AppError::validation("Issue title is required"));
        }
        let (_, remote) = self.remote_for(path).await?;
        remote.update_issue(number, title, body).await?;
        Ok(())
    }

    pub async fn get_settings(&self) -> SettingsView {
        SettingsView::from(&self.config.read().await.settings)
    }

    /// Apply a settings change, rebind GitHub-backed repositories to the new
    /// token and persist
    pub async fn update_settings(&self, update: SettingsUpdate) -> AppResult<SettingsView> {
        let (view, token_changed) = {
            let mut config = self.config.write().await;
            let mut token_changed = false;
            if let Some(token) = update.github_token {
                token_changed = token.trim() != config.settings.github_token;
                config.settings.github_token = token.trim().to_string();
            }
            if let Some(provider) = update.default_provider {
                config.settings.default_provider = provider;
            }
            (SettingsView::from(&config.settings), token_changed)
        };

        if token_changed {
            self.rebind_github_repositories().await;
        }
        info!("Settings updated");
        self.persist().await?;
        Ok(view)
    }

    /// Register and schedule the repositories listed in the configuration
    ///
    /// Entries that fail to restore are logged and skipped. Returns how many
    /// were restored.
    pub async fn restore(&self, repositories: &[RepositoryConfig]) -> usize {
        let mut restored = 0;
        for entry in repositories {
            match self.restore_one(entry).await {
                Ok(key) => {
                    info!("Restored repository {}", key);
                    restored += 1;
                }
                Err(e) => warn!("Skipping repository {}: {}", entry.path, e),
            }
        }
        restored
    }

    pub async fn scheduled_tasks(&self) -> Vec<TaskSnapshot> {
        self.scheduler.tasks().await
    }

    async fn restore_one(&self, entry: &RepositoryConfig) -> AppResult<String> {
        let key = key_for(&entry.path)?;
        ScheduleExpression::parse(&entry.schedule)?;
        self.git.open(Path::new(&key)).await?;

        let (_, token) = self.provider_settings().await;
        let remote = self.build_remote(entry.provider, &key, &entry.remote_path, token.as_deref());
        let mut repository = Repository::new(
            key.clone(),
            entry.schedule.clone(),
            entry.remote_path.clone(),
            remote,
        );
        repository.state = self.git.status(Path::new(&key)).await.ok();

        self.scheduler
            .add_task(key.clone(), &entry.schedule, self.sync_action(&key))
            .await?;
        self.registry.insert(repository).await;
        Ok(key)
    }

    async fn rebind_github_repositories(&self) {
        let (_, token) = self.provider_settings().await;
        let github_backed = self
            .registry
            .snapshots()
            .await
            .into_iter()
            .filter(|published| published.view.provider == ProviderKind::GitHub)
            .map(|published| published.view.path);
        for key in github_backed {
            let Ok(mut repository) = self.registry.checkout(&key).await else {
                continue;
            };
            // Switched away while waiting for the lock
            if repository.provider != ProviderKind::GitHub {
                continue;
            }
            let remote = self.build_remote(
                ProviderKind::GitHub,
                &key,
                &repository.remote_path,
                token.as_deref(),
            );
            repository.switch_provider(remote);
            if let Err(e) = repository.publish().await {
                warn!("Could not rebind {}: {}", key, e);
            }
        }
    }

    async fn remote_for(&self, path: &str) -> AppResult<(String, Arc<dyn RemoteProvider>)> {
        let key = key_for(path)?;
        let remote = self.registry.snapshot(&key).await?.remote;
        Ok((key, remote))
    }

    async fn provider_settings(&self) -> (ProviderKind, Option<String>) {
        let config = self.config.read().await;
        (
            config.settings.default_provider,
            config.settings.token().map(str::to_string),
        )
    }

    fn build_remote(
        &self,
        kind: ProviderKind,
        key: &str,
        remote_path: &str,
        token: Option<&str>,
    ) -> Arc<dyn RemoteProvider> {
        self.providers.build(kind, key, remote_path, token)
    }

    fn sync_action(&self, key: &str) -> Arc<SyncAction> {
        Arc::new(SyncAction::new(
            self.registry.clone(),
            self.git.clone(),
            key,
        ))
    }

    /// Configuration reflecting the registry's current contents
    async fn snapshot(&self) -> Config {
        let mut config = self.config.read().await.clone();
        config.repositories = self
            .registry
            .snapshots()
            .await
            .iter()
            .map(PublishedRepository::to_config)
            .collect();
        config
    }

    /// Save the current configuration
    ///
    /// A failure is logged and returned; the in-memory state is kept.
    async fn persist(&self) -> AppResult<()> {
        let config = self.snapshot().await;
        if let Err(e) = self.persistence.save(&config).await {
            error!("Error saving config: {}", e);
            return Err(e.into());
        }
        Ok(())
    }
}

fn key_for(path: &str) -> AppResult<String> {
    if path.trim().is_empty() {
        return Err(AppError::validation("Path parameter is required"));
    }
    canonical_key(Path::new(path)).map_err(|e| AppError::validation(format!("Invalid path: {e}")))
}
