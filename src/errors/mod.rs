//! Centralized error handling for the repo-sync service
//!
//! Each layer owns a focused error enum; `AppError` unifies them for the
//! service and web layers.
//!
//! # Error Categories
//!
//! - **Schedule Errors**: malformed or unsatisfiable schedule expressions
//! - **Registry Errors**: repositories missing from the registry
//! - **Provider Errors**: issue tracker failures (credentials, upstream, missing records)
//! - **Git Errors**: failures of the git working tree operations
//! - **Config Errors**: loading or saving the configuration file
//!
//! # Usage
//!
//! ```rust
//! use repo_sync::errors::{AppError, AppResult};
//!
//! fn example_function() -> AppResult<String> {
//!     Err(AppError::validation("path is required"))
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for provider Results
pub type ProviderResult<T> = Result<T, ProviderError>;
