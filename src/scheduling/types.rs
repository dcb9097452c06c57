//! Scheduling type definitions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

/// A unit of work the scheduler invokes when a task becomes due
///
/// Actions run on their own tokio task. Errors are handed to the scheduler's
/// [`FailureSink`] and never reach the dispatch loop.
#[async_trait]
pub trait ScheduledAction: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`ScheduledAction`]
pub struct FnAction<F> {
    f: F,
}

#[async_trait]
impl<F> ScheduledAction for FnAction<F>
where
    F: Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync,
{
    async fn run(&self) -> anyhow::Result<()> {
        (self.f)().await
    }
}

/// Wrap a closure returning a boxed future as a shared action
pub fn action_fn<F>(f: F) -> Arc<dyn ScheduledAction>
where
    F: Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
{
    Arc::new(FnAction { f })
}

/// Why an action was reported to the failure sink
#[derive(Debug)]
pub enum TaskFailure {
    /// The action returned an error
    Failed(anyhow::Error),
    /// The action panicked
    Panicked(String),
    /// The task's schedule has no further fire instant; the task was removed
    Exhausted(String),
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::Failed(e) => write!(f, "action failed: {e:#}"),
            TaskFailure::Panicked(msg) => write!(f, "action panicked: {msg}"),
            TaskFailure::Exhausted(msg) => write!(f, "task removed: {msg}"),
        }
    }
}

/// Receives asynchronous failures from scheduled actions
pub trait FailureSink: Send + Sync {
    fn report(&self, key: &str, failure: TaskFailure);
}

/// Default sink that logs failures through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFailureSink;

impl FailureSink for TracingFailureSink {
    fn report(&self, key: &str, failure: TaskFailure) {
        error!("Scheduled task '{}' {}", key, failure);
    }
}

/// Point-in-time view of one scheduled task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub key: String,
    pub schedule: String,
    pub next_fire: DateTime<Utc>,
}
