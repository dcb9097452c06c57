//! Git working tree operations
//!
//! [`GitBackend`] is the seam the service, the sync action and the local
//! provider use; [`CommandGit`] implements it by running the `git` binary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, trace};
use utoipa::ToSchema;

use crate::config::GitConfig;
use crate::errors::GitError;

#[cfg(test)]
pub(crate) mod stub;

/// Last observed state of a working tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RepositoryState {
    pub branch: String,
    pub commit: String,
    pub clean: bool,
}

#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Fail with `NotARepository` unless `path` is a git working tree
    async fn open(&self, path: &Path) -> Result<(), GitError>;

    async fn fetch(&self, path: &Path) -> Result<(), GitError>;

    async fn status(&self, path: &Path) -> Result<RepositoryState, GitError>;

    async fn clone_repository(&self, url: &str, dest: &Path) -> Result<(), GitError>;

    /// Unified diff between two revisions
    async fn diff(&self, path: &Path, base: &str, head: &str) -> Result<String, GitError>;

    /// Clone into `dest` when it is not a working tree yet, otherwise fetch
    async fn upsert(&self, url: &str, dest: &Path) -> Result<(), GitError> {
        if self.open(dest).await.is_ok() {
            debug!("Repository already present at {}, fetching", dest.display());
            self.fetch(dest).await
        } else {
            self.clone_repository(url, dest).await
        }
    }
}

/// [`GitBackend`] that shells out to `git`
#[derive(Debug, Clone)]
pub struct CommandGit {
    binary: PathBuf,
    ssh_key: Option<PathBuf>,
}

impl CommandGit {
    pub fn new(binary: impl Into<PathBuf>, ssh_key: Option<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ssh_key,
        }
    }

    /// Build from configuration, resolving the SSH key as described on
    /// [`resolve_ssh_key`]
    pub fn from_config(config: &GitConfig) -> Self {
        let ssh_key = resolve_ssh_key(
            config.ssh_key_path.clone(),
            std::env::var_os("SSH_KEY_PATH").map(PathBuf::from),
            dirs::home_dir(),
        );
        if let Some(key) = &ssh_key {
            debug!("Using SSH key {} for git transport", key.display());
        }
        Self::new(&config.binary, ssh_key)
    }

    async fn run<I, S>(&self, dir: Option<&Path>, args: I) -> Result<String, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args
            .into_iter()
            .map(|a| a.as_ref().to_os_string())
            .collect();
        let command_line = args
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");

        let mut command = Command::new(&self.binary);
        if let Some(dir) = dir {
            command.arg("-C").arg(dir);
        }
        command.args(&args).env("GIT_TERMINAL_PROMPT", "0");
        if let Some(key) = &self.ssh_key {
            command.env("GIT_SSH_COMMAND", ssh_command(key));
        }

        trace!("Running git {}", command_line);
        let output = command.output().await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(GitError::CommandFailed {
                command: command_line,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl GitBackend for CommandGit {
    async fn open(&self, path: &Path) -> Result<(), GitError> {
        let not_a_repository = || GitError::NotARepository {
            path: path.display().to_string(),
        };

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(not_a_repository());
        }

        match self
            .run(Some(path), ["rev-parse", "--is-inside-work-tree"])
            .await
        {
            Ok(out) if out.trim() == "true" => Ok(()),
            Ok(_) | Err(GitError::CommandFailed { .. }) => Err(not_a_repository()),
            Err(e) => Err(e),
        }
    }

    async fn fetch(&self, path: &Path) -> Result<(), GitError> {
        self.run(Some(path), ["fetch", "--all", "--prune"]).await?;
        debug!("Fetched {}", path.display());
        Ok(())
    }

    async fn status(&self, path: &Path) -> Result<RepositoryState, GitError> {
        let branch = self
            .run(Some(path), ["rev-parse", "--abbrev-ref", "HEAD"])
            .await
            .map(|b| b.trim().to_string())
            .unwrap_or_default();
        // Unborn HEAD has no commit yet
        let commit = self
            .run(Some(path), ["rev-parse", "HEAD"])
            .await
            .map(|c| c.trim().to_string())
            .unwrap_or_default();
        let porcelain = self.run(Some(path), ["status", "--porcelain"]).await?;

        Ok(RepositoryState {
            branch,
            commit,
            clean: porcelain.trim().is_empty(),
        })
    }

    async fn clone_repository(&self, url: &str, dest: &Path) -> Result<(), GitError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.run(
            None,
            [
                OsStr::new("clone"),
                OsStr::new("--"),
                OsStr::new(url),
                dest.as_os_str(),
            ],
        )
        .await?;
        debug!("Cloned {} into {}", url, dest.display());
        Ok(())
    }

    async fn diff(&self, path: &Path, base: &str, head: &str) -> Result<String, GitError> {
        // Branch names come from the tracker store and must never parse as options
        self.run(
            Some(path),
            [
                "diff".to_string(),
                "--end-of-options".to_string(),
                format!("{base}...{head}"),
            ],
        )
        .await
    }
}

/// Pick the SSH key for git transport
///
/// An explicit path wins, then `SSH_KEY_PATH`, then `~/.ssh/id_rsa` when that
/// file exists.
pub fn resolve_ssh_key(
    configured: Option<PathBuf>,
    env: Option<PathBuf>,
    home: Option<PathBuf>,
) -> Option<PathBuf> {
    configured
        .or(env.filter(|p| !p.as_os_str().is_empty()))
        .or_else(|| {
            home.map(|h| h.join(".ssh").join("id_rsa"))
                .filter(|p| p.is_file())
        })
}

fn ssh_command(key: &Path) -> String {
    format!(
        "ssh -i '{}' -o IdentitiesOnly=yes -l git",
        key.display()
    )
}
