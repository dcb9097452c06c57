//! Repository-local issue tracker
//!
//! Issues and pull requests live in `.repo-sync/local.json` inside the working
//! tree. Pull request diffs come from git, comparing the base and head
//! branches recorded on the pull request.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::RemoteProvider;
use crate::errors::{ProviderError, ProviderResult};
use crate::git::GitBackend;
use crate::models::{
    Comment, Issue, IssueFilter, IssueState, NewComment, NewIssue, ProviderKind, PullRequest,
    PullRequestState, Reaction, Reactions,
};

pub const STORE_DIR: &str = ".repo-sync";
pub const STORE_FILE: &str = "local.json";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalStore {
    #[serde(default)]
    issues: Vec<Issue>,
    #[serde(default)]
    pull_requests: Vec<PullRequest>,
}

impl LocalStore {
    /// Issues and pull requests share one number sequence
    fn next_number(&self) -> u64 {
        self.issues
            .iter()
            .map(|i| i.number)
            .chain(self.pull_requests.iter().map(|p| p.number))
            .max()
            .unwrap_or(0)
            + 1
    }

    fn next_comment_id(&self) -> i64 {
        self.comments().map(|c| c.id).max().unwrap_or(0) + 1
    }

    fn comments(&self) -> impl Iterator<Item = &Comment> {
        self.issues
            .iter()
            .flat_map(|i| i.comments.iter())
            .chain(self.pull_requests.iter().flat_map(|p| p.comments.iter()))
    }

    fn issue_mut(&mut self, number: u64) -> ProviderResult<&mut Issue> {
        self.issues
            .iter_mut()
            .find(|i| i.number == number)
            .ok_or_else(|| ProviderError::not_found("issue", number))
    }

    fn pull_request_mut(&mut self, number: u64) -> ProviderResult<&mut PullRequest> {
        self.pull_requests
            .iter_mut()
            .find(|p| p.number == number)
            .ok_or_else(|| ProviderError::not_found("pull request", number))
    }

    fn new_comment(&self, comment: NewComment) -> Comment {
        Comment {
            id: self.next_comment_id(),
            body: comment.body,
            diff_hunk: comment.diff_hunk,
            reactions: Reactions::default(),
        }
    }
}

pub struct LocalProvider {
    root: PathBuf,
    store_path: PathBuf,
    git: Arc<dyn GitBackend>,
    /// Shared by every provider instance writing the same store
    lock: Arc<Mutex<()>>,
}

impl LocalProvider {
    pub fn new(root: PathBuf, git: Arc<dyn GitBackend>) -> Self {
        Self::with_lock(root, git, Arc::new(Mutex::new(())))
    }

    pub fn with_lock(root: PathBuf, git: Arc<dyn GitBackend>, lock: Arc<Mutex<()>>) -> Self {
        Self {
            store_path: Self::store_path_for(&root),
            root,
            git,
            lock,
        }
    }

    pub fn store_path_for(root: &Path) -> PathBuf {
        root.join(STORE_DIR).join(STORE_FILE)
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    async fn load(&self) -> ProviderResult<LocalStore> {
        match tokio::fs::read(&self.store_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                ProviderError::upstream(format!(
                    "corrupt local store {}: {}",
                    self.store_path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(LocalStore::default()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn save(&self, store: &LocalStore) -> ProviderResult<()> {
        let json = serde_json::to_vec_pretty(store)
            .map_err(|e| ProviderError::upstream(e.to_string()))?;

        if let Some(dir) = self.store_path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| self.io_error(e))?;
            // Keeps the store out of `git status`
            let ignore = dir.join(".gitignore");
            if !tokio::fs::try_exists(&ignore).await.unwrap_or(false) {
                tokio::fs::write(&ignore, "*\n")
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }
        let temp = self.store_path.with_extension("json.tmp");
        tokio::fs::write(&temp, json)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&temp, &self.store_path)
            .await
            .map_err(|e| self.io_error(e))
    }

    async fn read<T>(&self, f: impl FnOnce(&LocalStore) -> ProviderResult<T>) -> ProviderResult<T> {
        let _lock = self.lock.lock().await;
        let store = self.load().await?;
        f(&store)
    }

    /// Load, apply `f`, and write back only when `f` succeeds
    async fn modify<T>(
        &self,
        f: impl FnOnce(&mut LocalStore) -> ProviderResult<T>,
    ) -> ProviderResult<T> {
        let _lock = self.lock.lock().await;
        let mut store = self.load().await?;
        let result = f(&mut store)?;
        self.save(&store).await?;
        Ok(result)
    }

    fn io_error(&self, error: std::io::Error) -> ProviderError {
        ProviderError::upstream(format!(
            "local store {}: {}",
            self.store_path.display(),
            error
        ))
    }
}

#[async_trait]
impl RemoteProvider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn fetch_issues(&self, filter: &IssueFilter) -> ProviderResult<Vec<Issue>> {
        self.read(|store| {
            Ok(store
                .issues
                .iter()
                .filter(|issue| filter.matches(issue))
                .cloned()
                .collect())
        })
        .await
    }

    async fn fetch_pull_requests(&self, label: Option<&str>) -> ProviderResult<Vec<PullRequest>> {
        self.read(|store| {
            Ok(store
                .pull_requests
                .iter()
                .filter(|pr| pr.state == PullRequestState::Open)
                .filter(|pr| label.is_none_or(|l| pr.labels.iter().any(|x| x == l)))
                .cloned()
                .collect())
        })
        .await
    }

    async fn create_issue(&self, issue: NewIssue) -> ProviderResult<u64> {
        let number = self
            .modify(|store| {
                let number = store.next_number();
                store.issues.push(Issue {
                    number,
                    title: issue.title,
                    body: issue.body,
                    state: IssueState::Open,
                    labels: issue.labels,
                    created_at: Utc::now(),
                    comments: Vec::new(),
                });
                Ok(number)
            })
            .await?;
        debug!("Created local issue #{} in {}", number, self.root.display());
        Ok(number)
    }

    async fn create_issue_comment(
        &self,
        number: u64,
        comment: NewComment,
    ) -> ProviderResult<Comment> {
        self.modify(|store| {
            let comment = store.new_comment(comment);
            store.issue_mut(number)?.comments.push(comment.clone());
            Ok(comment)
        })
        .await
    }

    async fn create_pr_comment(&self, number: u64, comment: NewComment) -> ProviderResult<Comment> {
        self.modify(|store| {
            let comment = store.new_comment(comment);
            store.pull_request_mut(number)?.comments.push(comment.clone());
            Ok(comment)
        })
        .await
    }

    async fn add_comment_reaction(
        &self,
        comment_id: i64,
        reaction: Reaction,
    ) -> ProviderResult<()> {
        self.modify(|store| {
            let comment = store
                .issues
                .iter_mut()
                .flat_map(|i| i.comments.iter_mut())
                .chain(
                    store
                        .pull_requests
                        .iter_mut()
                        .flat_map(|p| p.comments.iter_mut()),
                )
                .find(|c| c.id == comment_id)
                .ok_or_else(|| ProviderError::not_found("comment", comment_id))?;
            comment.reactions.add(reaction);
            Ok(())
        })
        .await
    }

    async fn fetch_diffs(&self, number: u64) -> ProviderResult<String> {
        let (base, head) = self
            .read(|store| {
                store
                    .pull_requests
                    .iter()
                    .find(|p| p.number == number)
                    .map(|p| (p.base_branch.clone(), p.head_branch.clone()))
                    .ok_or_else(|| ProviderError::not_found("pull request", number))
            })
            .await?;

        self.git
            .diff(&self.root, &base, &head)
            .await
            .map_err(|e| ProviderError::upstream(e.to_string()))
    }

    async fn add_label_to_issue(&self, number: u64, label: &str) -> ProviderResult<()> {
        self.modify(|store| {
            let issue = store.issue_mut(number)?;
            if !issue.labels.iter().any(|l| l == label) {
                issue.labels.push(label.to_string());
            }
            Ok(())
        })
        .await
    }

    async fn update_issue_state(&self, number: u64, state: IssueState) -> ProviderResult<()> {
        self.modify(|store| {
            store.issue_mut(number)?.state = state;
            Ok(())
        })
        .await
    }

    async fn update_pull_request_state(
        &self,
        number: u64,
        state: PullRequestState,
    ) -> ProviderResult<()> {
        self.modify(|store| {
            store.pull_request_mut(number)?.state = state;
            Ok(())
        })
        .await
    }

    async fn delete_issue(&self, number: u64) -> ProviderResult<()> {
        self.modify(|store| {
            let before = store.issues.len();
            store.issues.retain(|i| i.number != number);
            if store.issues.len() == before {
                return Err(ProviderError::not_found("issue", number));
            }
            Ok(())
        })
        .await
    }

    async fn delete_pull_request(&self, number: u64) -> ProviderResult<()> {
        self.modify(|store| {
            let before = store.pull_requests.len();
            store.pull_requests.retain(|p| p.number != number);
            if store.pull_requests.len() == before {
                return Err(ProviderError::not_found("pull request", number));
            }
            Ok(())
        })
        .await
    }

    async fn update_issue(&self, number: u64, title: &str, body: &str) -> ProviderResult<()> {
        self.modify(|store| {
            let issue = store.issue_mut(number)?;
            issue.title = title.to_string();
            issue.body = body.to_string();
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GitError;
    use tempfile::TempDir;

    struct DiffOnlyGit;

    #[async_trait]
    impl GitBackend for DiffOnlyGit {
        async fn open(&self, _path: &Path) -> Result<(), GitError> {
            Ok(())
        }
        async fn fetch(&self, _path: &Path) -> Result<(), GitError> {
            Ok(())
        }
        async fn status(&self, _path: &Path) -> Result<crate::git::RepositoryState, GitError> {
            Err(GitError::NotARepository {
                path: String::new(),
            })
        }
        async fn clone_repository(&self, _url: &str, _dest: &Path) -> Result<(), GitError> {
            Ok(())
        }
        async fn diff(&self, _path: &Path, base: &str, head: &str) -> Result<String, GitError> {
            Ok(format!("diff {base}...{head}"))
        }
    }

    fn provider(dir: &TempDir) -> LocalProvider {
        LocalProvider::new(dir.path().to_path_buf(), Arc::new(DiffOnlyGit))
    }

    fn issue(title: &str) -> NewIssue {
        NewIssue {
            title: title.to_string(),
            body: "body".to_string(),
            labels: Vec::new(),
        }
    }

    async fn seed_pull_request(provider: &LocalProvider, labels: Vec<String>) -> u64 {
        provider
            .modify(|store| {
                let number = store.next_number();
                store.pull_requests.push(PullRequest {
                    number,
                    title: "Add feature".to_string(),
                    body: String::new(),
                    state: PullRequestState::Open,
                    head_branch: "feature".to_string(),
                    base_branch: "main".to_string(),
                    labels,
                    comments: Vec::new(),
                });
                Ok(number)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_issue_lifecycle_persists_to_store() {
        let dir = TempDir::new().unwrap();
        let local = provider(&dir);

        let first = local.create_issue(issue("First")).await.unwrap();
        let second = local.create_issue(issue("Second")).await.unwrap();
        assert_eq!((first, second), (1, 2));
        assert!(local.store_path().exists());
        assert!(dir.path().join(STORE_DIR).join(".gitignore").exists());

        local.add_label_to_issue(first, "bug").await.unwrap();
        local.add_label_to_issue(first, "bug").await.unwrap();
        local
            .update_issue(first, "First (edited)", "new body")
            .await
            .unwrap();
        local
            .update_issue_state(second, IssueState::Closed)
            .await
            .unwrap();

        // A fresh provider reads the same file
        let reopened = provider(&dir);
        let open = reopened.fetch_issues(&IssueFilter::open()).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].title, "First (edited)");
        assert_eq!(open[0].labels, vec!["bug".to_string()]);

        let all = reopened.fetch_issues(&IssueFilter::all()).await.unwrap();
        assert_eq!(all.len(), 2);

        reopened.delete_issue(second).await.unwrap();
        assert_eq!(
            reopened.delete_issue(second).await.unwrap_err(),
            ProviderError::not_found("issue", second)
        );
    }

    #[tokio::test]
    async fn test_comments_and_reactions() {
        let dir = TempDir::new().unwrap();
        let local = provider(&dir);
        let number = local.create_issue(issue("Discuss")).await.unwrap();

        let comment = local
            .create_issue_comment(
                number,
                NewComment {
                    body: "Looks good".to_string(),
                    diff_hunk: None,
                },
            )
            .await
            .unwrap();
        local
            .add_comment_reaction(comment.id, Reaction::Heart)
            .await
            .unwrap();

        let issues = local.fetch_issues(&IssueFilter::all()).await.unwrap();
        assert_eq!(issues[0].comments.len(), 1);
        assert_eq!(issues[0].comments[0].reactions.heart, 1);

        assert!(matches!(
            local.add_comment_reaction(999, Reaction::Eyes).await,
            Err(ProviderError::NotFound { .. })
        ));
        assert!(matches!(
            local
                .create_issue_comment(999, NewComment::default())
                .await,
            Err(ProviderError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_pull_requests_diff_state_and_delete() {
        let dir = TempDir::new().unwrap();
        let local = provider(&dir);
        let labelled = seed_pull_request(&local, vec!["ready".to_string()]).await;
        let plain = seed_pull_request(&local, Vec::new()).await;

        assert_eq!(local.fetch_pull_requests(None).await.unwrap().len(), 2);
        let ready = local.fetch_pull_requests(Some("ready")).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].number, labelled);

        let review = local
            .create_pr_comment(
                labelled,
                NewComment {
                    body: "nit".to_string(),
                    diff_hunk: Some("@@ -1 +1 @@".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(review.diff_hunk.as_deref(), Some("@@ -1 +1 @@"));

        assert_eq!(
            local.fetch_diffs(labelled).await.unwrap(),
            "diff main...feature"
        );

        local
            .update_pull_request_state(plain, PullRequestState::Merged)
            .await
            .unwrap();
        assert_eq!(local.fetch_pull_requests(None).await.unwrap().len(), 1);

        local.delete_pull_request(labelled).await.unwrap();
        assert!(local.fetch_pull_requests(None).await.unwrap().is_empty());
        assert!(matches!(
            local.fetch_diffs(labelled).await,
            Err(ProviderError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_mutation_does_not_write() {
        let dir = TempDir::new().unwrap();
        let local = provider(&dir);

        assert!(local.update_issue_state(1, IssueState::Closed).await.is_err());
        assert!(!local.store_path().exists());
    }
}
