//! Repository synchronization
//!
//! [`SyncAction`] is what the scheduler runs for each tracked repository. It
//! holds the registry handle and the repository's key rather than the
//! repository itself, so every run sees the current registration: a repository
//! deleted or replaced since the task was scheduled is looked up afresh.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::AppResult;
use crate::git::GitBackend;
use crate::models::{IssueFilter, Repository, RepositoryView};
use crate::registry::ResourceRegistry;
use crate::scheduling::ScheduledAction;

pub struct SyncAction {
    registry: ResourceRegistry<Repository>,
    git: Arc<dyn GitBackend>,
    path: String,
}

impl SyncAction {
    pub fn new(
        registry: ResourceRegistry<Repository>,
        git: Arc<dyn GitBackend>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            git,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl ScheduledAction for SyncAction {
    async fn run(&self) -> anyhow::Result<()> {
        sync_repository(&self.registry, self.git.as_ref(), &self.path)
            .await
            .with_context(|| format!("sync of {} failed", self.path))?;
        Ok(())
    }
}

/// Fetch, refresh git state and refresh the tracker cache of one repository
///
/// A failed fetch marks the repository failed and returns the error. Tracker
/// failures are recorded in `last_error` while the previous cache is kept.
pub async fn sync_repository(
    registry: &ResourceRegistry<Repository>,
    git: &dyn GitBackend,
    path: &str,
) -> AppResult<RepositoryView> {
    let mut repository = registry.checkout(path).await?;
    repository.mark_syncing();
    // Readers see the sync in progress without waiting for it
    repository.share();
    debug!("Syncing repository {}", path);

    let working_tree = Path::new(path);
    if let Err(e) = git.fetch(working_tree).await {
        warn!("Fetch failed for {}: {}", path, e);
        repository.mark_failed(Utc::now(), e.to_string());
        repository.publish().await?;
        return Err(e.into());
    }

    let mut problems = Vec::new();
    match git.status(working_tree).await {
        Ok(state) => repository.state = Some(state),
        Err(e) => problems.push(format!("status: {e}")),
    }

    let remote = repository.remote.clone();
    match remote.fetch_issues(&IssueFilter::open()).await {
        Ok(issues) => repository.issues = issues,
        Err(e) => problems.push(format!("issues: {e}")),
    }
    match remote.fetch_pull_requests(None).await {
        Ok(pull_requests) => repository.pull_requests = pull_requests,
        Err(e) => problems.push(format!("pull requests: {e}")),
    }

    repository.mark_synced(Utc::now());
    if problems.is_empty() {
        info!(
            "Synced {} ({} open issues, {} pull requests)",
            path,
            repository.issues.len(),
            repository.pull_requests.len()
        );
    } else {
        let message = problems.join("; ");
        warn!("Synced {} with stale tracker data: {}", path, message);
        repository.last_error = Some(message);
    }

    let view = repository.view();
    repository.publish().await?;
    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AppError, ProviderError, ProviderResult, RegistryError};
    use crate::git::stub::StubGit;
    use crate::models::{
        Comment, Issue, IssueState, NewComment, NewIssue, ProviderKind, PullRequest,
        PullRequestState, Reaction, SyncStatus,
    };
    use crate::remote::RemoteProvider;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    const PATH: &str = "/srv/repos/widgets";

    /// Tracker with a single open issue that can be switched offline or held
    #[derive(Default)]
    struct FlakyTracker {
        offline: AtomicBool,
        held: AtomicBool,
        release: Notify,
    }

    #[async_trait]
    impl RemoteProvider for FlakyTracker {
        fn kind(&self) -> ProviderKind {
            ProviderKind::GitHub
        }

        async fn fetch_issues(&self, _filter: &IssueFilter) -> ProviderResult<Vec<Issue>> {
            if self.held.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            if self.offline.load(Ordering::SeqCst) {
                return Err(ProviderError::upstream("connection refused"));
            }
            Ok(vec![Issue {
                number: 1,
                title: "Crash on start".to_string(),
                body: String::new(),
                state: IssueState::Open,
                labels: Vec::new(),
                created_at: Utc::now(),
                comments: Vec::new(),
            }])
        }

        async fn fetch_pull_requests(&self, _label: Option<&str>) -> ProviderResult<Vec<PullRequest>> {
            Ok(Vec::new())
        }

        async fn create_issue(&self, _issue: NewIssue) -> ProviderResult<u64> {
            unimplemented!()
        }

        async fn create_issue_comment(&self, _n: u64, _c: NewComment) -> ProviderResult<Comment> {
            unimplemented!()
        }

        async fn create_pr_comment(&self, _n: u64, _c: NewComment) -> ProviderResult<Comment> {
            unimplemented!()
        }

        async fn add_comment_reaction(&self, _id: i64, _r: Reaction) -> ProviderResult<()> {
            unimplemented!()
        }

        async fn fetch_diffs(&self, _n: u64) -> ProviderResult<String> {
            unimplemented!()
        }

        async fn add_label_to_issue(&self, _n: u64, _l: &str) -> ProviderResult<()> {
            unimplemented!()
        }

        async fn update_issue_state(&self, _n: u64, _s: IssueState) -> ProviderResult<()> {
            unimplemented!()
        }

        async fn update_pull_request_state(&self, _n: u64, _s: PullRequestState) -> ProviderResult<()> {
            unimplemented!()
        }

        async fn delete_issue(&self, _n: u64) -> ProviderResult<()> {
            unimplemented!()
        }

        async fn delete_pull_request(&self, _n: u64) -> ProviderResult<()> {
            unimplemented!()
        }

        async fn update_issue(&self, _n: u64, _t: &str, _b: &str) -> ProviderResult<()> {
            unimplemented!()
        }
    }

    async fn setup() -> (ResourceRegistry<Repository>, Arc<StubGit>, Arc<FlakyTracker>) {
        let registry = ResourceRegistry::new();
        let git = Arc::new(StubGit::with_repositories([PATH]));
        let tracker = Arc::new(FlakyTracker::default());
        registry
            .insert(Repository::new(PATH, "0 * * * *", "acme/widgets", tracker.clone()))
            .await;
        (registry, git, tracker)
    }

    #[tokio::test]
    async fn test_sync_refreshes_state_and_cache() {
        let (registry, git, _tracker) = setup().await;

        let view = sync_repository(&registry, git.as_ref(), PATH).await.unwrap();

        assert_eq!(view.status, SyncStatus::Synced);
        assert_eq!(view.issues.len(), 1);
        assert_eq!(view.state.unwrap().branch, "main");
        assert!(view.last_synced_at.is_some());
        assert!(view.last_error.is_none());
        assert_eq!(git.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_marks_repository_failed() {
        let (registry, git, _tracker) = setup().await;
        git.fail_fetch.store(true, Ordering::SeqCst);

        let result = sync_repository(&registry, git.as_ref(), PATH).await;
        assert!(matches!(result, Err(AppError::Git(_))));

        let handle = registry.lookup(PATH).await.unwrap();
        let repository = handle.lock().await;
        assert_eq!(repository.status, SyncStatus::Failed);
        assert!(
            repository
                .last_error
                .as_deref()
                .unwrap()
                .contains("could not read")
        );
    }

    #[tokio::test]
    async fn test_tracker_failure_keeps_previous_cache() {
        let (registry, git, tracker) = setup().await;
        sync_repository(&registry, git.as_ref(), PATH).await.unwrap();

        tracker.offline.store(true, Ordering::SeqCst);
        let view = sync_repository(&registry, git.as_ref(), PATH).await.unwrap();

        assert_eq!(view.status, SyncStatus::Synced);
        assert_eq!(view.issues.len(), 1);
        assert!(view.last_error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_sync_in_flight_is_visible_without_waiting() {
        let (registry, git, tracker) = setup().await;
        tracker.held.store(true, Ordering::SeqCst);

        let running = {
            let registry = registry.clone();
            let git = git.clone();
            tokio::spawn(async move { sync_repository(&registry, git.as_ref(), PATH).await })
        };

        tokio::time::timeout(Duration::from_secs(2), async {
            while registry.snapshot(PATH).await.unwrap().view.status != SyncStatus::Syncing {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("sync never reported progress");
        assert_eq!(registry.snapshots().await.len(), 1);

        tracker.release.notify_one();
        let view = running.await.unwrap().unwrap();
        assert_eq!(view.status, SyncStatus::Synced);
        assert_eq!(
            registry.snapshot(PATH).await.unwrap().view.status,
            SyncStatus::Synced
        );
    }

    #[tokio::test]
    async fn test_action_reports_unknown_repository() {
        let registry = ResourceRegistry::new();
        let git: Arc<dyn GitBackend> = Arc::new(StubGit::default());
        let action = SyncAction::new(registry.clone(), git.clone(), "/gone");

        let error = action.run().await.unwrap_err();
        assert!(error.to_string().contains("/gone"));
        assert!(matches!(
            sync_repository(&registry, git.as_ref(), "/gone").await,
            Err(AppError::Registry(RegistryError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_action_sees_replacement_registered_after_scheduling() {
        let (registry, git, _tracker) = setup().await;
        let action = SyncAction::new(registry.clone(), git.clone(), PATH);

        let replacement = Arc::new(FlakyTracker::default());
        registry
            .insert(Repository::new(PATH, "*/5 * * * *", "acme/widgets", replacement))
            .await;
        action.run().await.unwrap();

        let handle = registry.lookup(PATH).await.unwrap();
        let repository = handle.lock().await;
        assert_eq!(repository.schedule, "*/5 * * * *");
        assert_eq!(repository.status, SyncStatus::Synced);
    }
}
