//! Error type definitions for the repo-sync service

use thiserror::Error;

/// Top-level application error type
///
/// Returned by the repository service and mapped to HTTP status codes by
/// `web::responses::handle_error`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Schedule expression errors
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Registry lookups and republish failures
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Remote provider failures
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Git working tree failures
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    /// Configuration load/save failures
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Schedule expression parsing and evaluation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The expression is structurally invalid or contains out-of-domain values
    #[error("Invalid schedule expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    /// No fire instant exists within the bounded lookahead
    #[error("Schedule expression '{expression}' never fires within {years} years")]
    UnsatisfiableExpression { expression: String, years: i32 },
}

/// Resource registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No repository is registered under the path, or it vanished before republish
    #[error("Repository not found: {path}")]
    NotFound { path: String },
}

/// Remote provider errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Missing or rejected credential
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Network or API failure
    #[error("Upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },

    /// Referenced issue, pull request or comment does not exist
    #[error("Not found: {resource} {id}")]
    NotFound { resource: String, id: String },
}

/// Git plumbing errors
#[derive(Error, Debug)]
pub enum GitError {
    /// The path is not a git working tree
    #[error("Not a git repository: {path}")]
    NotARepository { path: String },

    /// A git command exited unsuccessfully
    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Spawning git or touching the filesystem failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {field} - {message}")]
    Invalid { field: String, message: String },
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        Self::Load(Box::new(error))
    }
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a validation error with a custom message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a not-found error for a repository path
    pub fn repository_not_found<S: Into<String>>(path: S) -> Self {
        Self::Registry(RegistryError::NotFound { path: path.into() })
    }
}

impl ScheduleError {
    pub fn invalid<E: Into<String>, R: Into<String>>(expression: E, reason: R) -> Self {
        Self::InvalidExpression {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

impl ProviderError {
    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn upstream<S: Into<String>>(message: S) -> Self {
        Self::UpstreamUnavailable {
            message: message.into(),
        }
    }

    pub fn not_found<R: Into<String>, I: ToString>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.to_string(),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        Self::upstream(error.to_string())
    }
}
