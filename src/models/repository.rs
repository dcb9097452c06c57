use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use strum::{Display, EnumString};
use utoipa::ToSchema;

use super::tracker::{Issue, PullRequest};
use crate::config::RepositoryConfig;
use crate::git::RepositoryState;
use crate::registry::Resource;
use crate::remote::RemoteProvider;

/// Which issue tracker backs a repository
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderKind {
    #[serde(rename = "github")]
    #[strum(serialize = "github")]
    GitHub,
    #[default]
    Local,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SyncStatus {
    /// Registered but never synced
    #[default]
    Idle,
    Syncing,
    Synced,
    Failed,
}

/// A tracked repository
///
/// Lives inside the registry behind its own lock; see
/// [`crate::registry::ResourceRegistry`] for the mutation discipline.
pub struct Repository {
    pub path: String,
    pub schedule: String,
    /// `owner/name` on the remote tracker
    pub remote_path: String,
    pub provider: ProviderKind,
    pub remote: Arc<dyn RemoteProvider>,
    pub status: SyncStatus,
    pub state: Option<RepositoryState>,
    pub issues: Vec<Issue>,
    pub pull_requests: Vec<PullRequest>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Repository {
    pub fn new(
        path: impl Into<String>,
        schedule: impl Into<String>,
        remote_path: impl Into<String>,
        remote: Arc<dyn RemoteProvider>,
    ) -> Self {
        Self {
            path: path.into(),
            schedule: schedule.into(),
            remote_path: remote_path.into(),
            provider: remote.kind(),
            remote,
            status: SyncStatus::Idle,
            state: None,
            issues: Vec::new(),
            pull_requests: Vec::new(),
            last_synced_at: None,
            last_error: None,
        }
    }

    /// Replace the provider; callers hold the repository lock
    ///
    /// Cached records are dropped when the tracker kind changes.
    pub fn switch_provider(&mut self, remote: Arc<dyn RemoteProvider>) {
        let kind = remote.kind();
        if kind != self.provider {
            self.issues.clear();
            self.pull_requests.clear();
        }
        self.provider = kind;
        self.remote = remote;
    }

    pub fn mark_syncing(&mut self) {
        self.status = SyncStatus::Syncing;
    }

    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.status = SyncStatus::Synced;
        self.last_synced_at = Some(at);
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.status = SyncStatus::Failed;
        self.last_synced_at = Some(at);
        self.last_error = Some(error.into());
    }

    pub fn view(&self) -> RepositoryView {
        RepositoryView {
            path: self.path.clone(),
            schedule: self.schedule.clone(),
            remote_path: self.remote_path.clone(),
            provider: self.provider,
            status: self.status,
            state: self.state.clone(),
            issues: self.issues.clone(),
            pull_requests: self.pull_requests.clone(),
            last_synced_at: self.last_synced_at,
            last_error: self.last_error.clone(),
        }
    }
}

impl Resource for Repository {
    type Snapshot = PublishedRepository;

    fn key(&self) -> &str {
        &self.path
    }

    fn snapshot(&self) -> PublishedRepository {
        PublishedRepository {
            view: self.view(),
            remote: self.remote.clone(),
        }
    }
}

/// What readers see of a repository without waiting for its lock
#[derive(Clone)]
pub struct PublishedRepository {
    pub view: RepositoryView,
    pub remote: Arc<dyn RemoteProvider>,
}

impl PublishedRepository {
    pub fn to_config(&self) -> RepositoryConfig {
        self.view.to_config()
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("path", &self.path)
            .field("schedule", &self.schedule)
            .field("remote_path", &self.remote_path)
            .field("provider", &self.provider)
            .field("status", &self.status)
            .field("issues", &self.issues.len())
            .field("pull_requests", &self.pull_requests.len())
            .finish()
    }
}

/// Serializable snapshot of a [`Repository`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryView {
    pub path: String,
    pub schedule: String,
    pub remote_path: String,
    pub provider: ProviderKind,
    pub status: SyncStatus,
    pub state: Option<RepositoryState>,
    pub issues: Vec<Issue>,
    pub pull_requests: Vec<PullRequest>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl RepositoryView {
    pub fn to_config(&self) -> RepositoryConfig {
        RepositoryConfig {
            path: self.path.clone(),
            schedule: self.schedule.clone(),
            remote_path: self.remote_path.clone(),
            provider: self.provider,
        }
    }
}

/// A repository the configured GitHub account can access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRepository {
    /// `owner/name`
    pub full_name: String,
    pub description: String,
    pub private: bool,
    pub default_branch: String,
    pub clone_url: String,
    pub ssh_url: String,
    pub html_url: String,
}
