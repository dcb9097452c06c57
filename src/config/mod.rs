//! Service configuration
//!
//! Values are layered with `figment`: built-in defaults, then the TOML file,
//! then `REPO_SYNC_`-prefixed environment variables (`__` separates nested
//! keys, e.g. `REPO_SYNC_WEB__PORT=9000`).

use chrono_tz::Tz;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::errors::ConfigError;
use crate::models::ProviderKind;

pub mod defaults;

use defaults::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// IANA zone schedules are evaluated in
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_git_binary")]
    pub binary: String,
    /// Private key for SSH remotes; falls back to `SSH_KEY_PATH`, then `~/.ssh/id_rsa`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
    /// Human-readable duration, e.g. `30s` or `1m30s`
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// User-editable settings, exposed over the settings endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Empty means no token configured
    #[serde(default)]
    pub github_token: String,
    #[serde(default)]
    pub default_provider: ProviderKind,
}

impl Settings {
    pub fn token(&self) -> Option<&str> {
        let token = self.github_token.trim();
        (!token.is_empty()).then_some(token)
    }
}

/// A tracked repository as persisted on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub path: String,
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default)]
    pub remote_path: String,
    #[serde(default)]
    pub provider: ProviderKind,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_git_binary() -> String {
    DEFAULT_GIT_BINARY.to_string()
}

fn default_github_api_url() -> String {
    DEFAULT_GITHUB_API_URL.to_string()
}

fn default_request_timeout() -> String {
    DEFAULT_REQUEST_TIMEOUT.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

pub fn default_schedule() -> String {
    DEFAULT_SCHEDULE.to_string()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            ssh_key_path: None,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            github_api_url: default_github_api_url(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl SchedulerConfig {
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        Tz::from_str(&self.timezone).map_err(|e| ConfigError::Invalid {
            field: "scheduler.timezone".to_string(),
            message: e.to_string(),
        })
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(&self.request_timeout).map_err(|e| ConfigError::Invalid {
            field: "remote.request_timeout".to_string(),
            message: format!("'{}': {}", self.request_timeout, e),
        })
    }
}

impl Config {
    /// Load configuration, writing a default file first when `config_file` is missing
    pub fn load_from_file(config_file: &Path) -> Result<Self, ConfigError> {
        if !config_file.exists() {
            Self::default().save_to_file(config_file)?;
            info!("Created default config file: {}", config_file.display());
        }

        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split(ENV_SEPARATOR))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.timezone()?;
        self.remote.request_timeout()?;
        if self.git.binary.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "git.binary".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Write the configuration as TOML, replacing the file atomically
    pub fn save_to_file(&self, config_file: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;

        let dir = match config_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        temp.write_all(contents.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(config_file).map_err(|e| ConfigError::Io(e.error))?;
        Ok(())
    }
}
