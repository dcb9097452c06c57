//! In-memory [`GitBackend`] for unit tests

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{GitBackend, RepositoryState};
use crate::errors::GitError;

/// Treats a fixed set of paths as working trees and records calls
#[derive(Default)]
pub(crate) struct StubGit {
    repositories: Mutex<HashSet<PathBuf>>,
    pub fail_fetch: AtomicBool,
    pub fetches: AtomicUsize,
    pub clones: Mutex<Vec<(String, PathBuf)>>,
}

impl StubGit {
    pub fn with_repositories<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let stub = Self::default();
        if let Ok(mut repositories) = stub.repositories.lock() {
            repositories.extend(paths.into_iter().map(Into::into));
        }
        stub
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn known(&self, path: &Path) -> bool {
        self.repositories
            .lock()
            .map(|repositories| repositories.contains(path))
            .unwrap_or(false)
    }
}

#[async_trait]
impl GitBackend for StubGit {
    async fn open(&self, path: &Path) -> Result<(), GitError> {
        if self.known(path) {
            Ok(())
        } else {
            Err(GitError::NotARepository {
                path: path.display().to_string(),
            })
        }
    }

    async fn fetch(&self, path: &Path) -> Result<(), GitError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(GitError::CommandFailed {
                command: format!("git -C {} fetch", path.display()),
                stderr: "could not read from remote repository".to_string(),
            });
        }
        self.open(path).await
    }

    async fn status(&self, path: &Path) -> Result<RepositoryState, GitError> {
        self.open(path).await?;
        Ok(RepositoryState {
            branch: "main".to_string(),
            commit: "0123456789abcdef".to_string(),
            clean: true,
        })
    }

    async fn clone_repository(&self, url: &str, dest: &Path) -> Result<(), GitError> {
        if let Ok(mut clones) = self.clones.lock() {
            clones.push((url.to_string(), dest.to_path_buf()));
        }
        if let Ok(mut repositories) = self.repositories.lock() {
            repositories.insert(dest.to_path_buf());
        }
        Ok(())
    }

    async fn diff(&self, _path: &Path, base: &str, head: &str) -> Result<String, GitError> {
        Ok(format!("diff --git {base}...{head}\n"))
    }
}
