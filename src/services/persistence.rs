//! Configuration persistence collaborator
//!
//! The service calls [`ConfigPersistence::save`] with a fresh snapshot after
//! every mutation. Callers report save failures but keep the in-memory change.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::config::Config;
use crate::errors::ConfigError;

#[async_trait]
pub trait ConfigPersistence: Send + Sync {
    async fn save(&self, config: &Config) -> Result<(), ConfigError>;
}

/// Writes the configuration back to its TOML file
pub struct FileConfigPersistence {
    path: PathBuf,
}

impl FileConfigPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigPersistence for FileConfigPersistence {
    async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let config = config.clone();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || config.save_to_file(&path))
            .await
            .map_err(|e| ConfigError::Io(std::io::Error::other(e)))??;
        debug!("Saved configuration to {}", self.path.display());
        Ok(())
    }
}

/// Keeps every saved snapshot in memory
#[derive(Default)]
pub struct MemoryConfigPersistence {
    saved: Mutex<Vec<Config>>,
    fail: AtomicBool,
}

impl MemoryConfigPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent saves fail
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn last(&self) -> Option<Config> {
        self.saved.lock().ok().and_then(|saved| saved.last().cloned())
    }

    pub fn save_count(&self) -> usize {
        self.saved.lock().map(|saved| saved.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ConfigPersistence for MemoryConfigPersistence {
    async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "configuration is read-only",
            )));
        }
        if let Ok(mut saved) = self.saved.lock() {
            saved.push(config.clone());
        }
        Ok(())
    }
}
