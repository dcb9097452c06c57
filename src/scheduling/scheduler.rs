//! Periodic scheduler with a dynamically reconfigurable task set
//!
//! A single dispatch loop sleeps until the earliest `next_fire` across all
//! tasks, or until a registration wakes it. Due actions are spawned on their
//! own tokio tasks so a slow or failing action never delays the loop.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::expression::ScheduleExpression;
use super::types::{FailureSink, ScheduledAction, TaskFailure, TaskSnapshot, TracingFailureSink};
use crate::errors::ScheduleError;

/// How long the loop sleeps when no tasks are registered
const IDLE_SLEEP: Duration = Duration::from_secs(3600);

struct TaskEntry {
    schedule: ScheduleExpression,
    action: Arc<dyn ScheduledAction>,
    next_fire: DateTime<Utc>,
}

struct Runner {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    tasks: RwLock<HashMap<String, TaskEntry>>,
    wake: Notify,
    failure_sink: Arc<dyn FailureSink>,
    timezone: Tz,
    runner: Mutex<Option<Runner>>,
}

/// Cron-style scheduler keyed by task name
///
/// Cloning is cheap; all clones share the same task set and dispatch loop.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a scheduler evaluating schedules in `timezone`, logging failures
    pub fn new(timezone: Tz) -> Self {
        Self::with_failure_sink(timezone, Arc::new(TracingFailureSink))
    }

    pub fn with_failure_sink(timezone: Tz, failure_sink: Arc<dyn FailureSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: RwLock::new(HashMap::new()),
                wake: Notify::new(),
                failure_sink,
                timezone,
                runner: Mutex::new(None),
            }),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.inner.timezone
    }

    /// Register or replace the task under `key`
    ///
    /// The expression is parsed and its first fire instant computed before the
    /// task set is touched, so a rejected schedule leaves any existing task
    /// under `key` in place. Returns the first fire instant.
    pub async fn add_task(
        &self,
        key: impl Into<String>,
        schedule: &str,
        action: Arc<dyn ScheduledAction>,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let key = key.into();
        let schedule = ScheduleExpression::parse(schedule)?;
        let next_fire = self.inner.next_fire(&schedule, Utc::now())?;

        let replaced = {
            let mut tasks = self.inner.tasks.write().await;
            tasks
                .insert(
                    key.clone(),
                    TaskEntry {
                        schedule: schedule.clone(),
                        action,
                        next_fire,
                    },
                )
                .is_some()
        };
        self.inner.wake.notify_one();

        if replaced {
            info!(
                "Replaced scheduled task '{}' with '{}', next fire at {}",
                key, schedule, next_fire
            );
        } else {
            info!(
                "Scheduled task '{}' with '{}', next fire at {}",
                key, schedule, next_fire
            );
        }
        Ok(next_fire)
    }

    /// Same contract as [`Scheduler::add_task`]
    pub async fn update_task(
        &self,
        key: impl Into<String>,
        schedule: &str,
        action: Arc<dyn ScheduledAction>,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        self.add_task(key, schedule, action).await
    }

    /// Cancel future fires of `key`. Returns whether a task was removed.
    ///
    /// An invocation already running is left to finish.
    pub async fn remove_task(&self, key: &str) -> bool {
        let removed = self.inner.tasks.write().await.remove(key).is_some();
        if removed {
            self.inner.wake.notify_one();
            info!("Removed scheduled task '{}'", key);
        } else {
            debug!("No scheduled task '{}' to remove", key);
        }
        removed
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.tasks.read().await.contains_key(key)
    }

    /// Snapshot of every task, sorted by key
    pub async fn tasks(&self) -> Vec<TaskSnapshot> {
        let tasks = self.inner.tasks.read().await;
        let mut snapshot: Vec<TaskSnapshot> = tasks
            .iter()
            .map(|(key, entry)| TaskSnapshot {
                key: key.clone(),
                schedule: entry.schedule.to_string(),
                next_fire: entry.next_fire,
            })
            .collect();
        snapshot.sort_by(|a, b| a.key.cmp(&b.key));
        snapshot
    }

    /// Earliest pending fire instant across all tasks
    pub async fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.inner.next_wakeup().await
    }

    /// Dispatch every task due at `now` and advance its `next_fire`
    ///
    /// Returns the handles of the spawned invocations.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        self.inner.run_due(now).await
    }

    /// Start the dispatch loop. Calling it on a running scheduler does nothing.
    pub async fn start(&self) {
        let mut runner = self.inner.runner.lock().await;
        if let Some(existing) = runner.as_ref() {
            if !existing.handle.is_finished() {
                debug!("Scheduler already running");
                return;
            }
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_loop(self.inner.clone(), token.clone()));
        *runner = Some(Runner { token, handle });
        info!("Scheduler started (timezone {})", self.inner.timezone);
    }

    /// Halt the dispatch loop without waiting for in-flight actions
    pub async fn stop(&self) {
        let Some(runner) = self.inner.runner.lock().await.take() else {
            debug!("Scheduler not running");
            return;
        };

        runner.token.cancel();
        if let Err(e) = runner.handle.await {
            warn!("Scheduler loop ended abnormally: {}", e);
        }
        info!("Scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.inner
            .runner
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

impl Inner {
    fn next_fire(
        &self,
        schedule: &ScheduleExpression,
        after: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        schedule
            .next_fire_after(&after.with_timezone(&self.timezone))
            .map(|fire| fire.with_timezone(&Utc))
    }

    async fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.tasks
            .read()
            .await
            .values()
            .map(|entry| entry.next_fire)
            .min()
    }

    async fn run_due(&self, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        let mut exhausted = Vec::new();

        {
            let mut tasks = self.tasks.write().await;
            for (key, entry) in tasks.iter_mut() {
                if entry.next_fire > now {
                    continue;
                }

                // Spawning only queues the action; it never runs inline here.
                // Doing it under the lock means a replaced task cannot fire
                // after add_task has returned.
                handles.push(self.dispatch(key.clone(), entry.action.clone()));

                match self.next_fire(&entry.schedule, now) {
                    Ok(next) => {
                        trace!("Task '{}' next fire at {}", key, next);
                        entry.next_fire = next;
                    }
                    Err(e) => exhausted.push((key.clone(), e)),
                }
            }

            for (key, _) in &exhausted {
                tasks.remove(key);
            }
        }

        for (key, error) in exhausted {
            self.failure_sink
                .report(&key, TaskFailure::Exhausted(error.to_string()));
        }

        if !handles.is_empty() {
            debug!("Dispatched {} scheduled task(s) at {}", handles.len(), now);
        }
        handles
    }

    fn dispatch(&self, key: String, action: Arc<dyn ScheduledAction>) -> JoinHandle<()> {
        let sink = self.failure_sink.clone();
        tokio::spawn(async move {
            debug!("Running scheduled task '{}'", key);
            match AssertUnwindSafe(action.run()).catch_unwind().await {
                Ok(Ok(())) => debug!("Scheduled task '{}' completed", key),
                Ok(Err(e)) => sink.report(&key, TaskFailure::Failed(e)),
                Err(panic) => sink.report(&key, TaskFailure::Panicked(panic_message(&*panic))),
            }
        })
    }
}

async fn run_loop(inner: Arc<Inner>, token: CancellationToken) {
    info!("Scheduler dispatch loop running");

    loop {
        let sleep_for = match inner.next_wakeup().await {
            Some(next) => (next - Utc::now()).to_std().unwrap_or(Duration::ZERO),
            None => IDLE_SLEEP,
        };
        trace!("Scheduler sleeping for {:?}", sleep_for);

        tokio::select! {
            _ = token.cancelled() => {
                info!("Scheduler received cancellation signal, shutting down");
                break;
            }
            _ = inner.wake.notified() => {
                trace!("Scheduler woken by task set change");
            }
            _ = tokio::time::sleep(sleep_for) => {
                inner.run_due(Utc::now()).await;
            }
        }
    }

    info!("Scheduler dispatch loop stopped");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::types::action_fn;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingSink {
        reports: StdMutex<Vec<(String, String)>>,
    }

    impl FailureSink for RecordingSink {
        fn report(&self, key: &str, failure: TaskFailure) {
            self.reports
                .lock()
                .unwrap()
                .push((key.to_string(), failure.to_string()));
        }
    }

    fn counting_action(counter: Arc<AtomicUsize>) -> Arc<dyn ScheduledAction> {
        action_fn(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    async fn join_all(handles: Vec<JoinHandle<()>>) {
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_add_task_replaces_existing_entry() {
        let scheduler = Scheduler::new(chrono_tz::UTC);
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        scheduler
            .add_task("r1", "* * * * *", counting_action(a.clone()))
            .await
            .unwrap();
        scheduler
            .add_task("r1", "0 0 * * *", counting_action(b.clone()))
            .await
            .unwrap();

        let tasks = scheduler.tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].key, "r1");
        assert_eq!(tasks[0].schedule, "0 0 * * *");

        let handles = scheduler.run_due(tasks[0].next_fire).await;
        assert_eq!(handles.len(), 1);
        join_all(handles).await;

        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_schedule_keeps_existing_entry() {
        let scheduler = Scheduler::new(chrono_tz::UTC);
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .add_task("r1", "*/5 * * * *", counting_action(counter.clone()))
            .await
            .unwrap();

        let result = scheduler
            .update_task("r1", "*/61 * * * *", counting_action(counter.clone()))
            .await;
        assert!(matches!(result, Err(ScheduleError::InvalidExpression { .. })));

        let result = scheduler
            .update_task("r1", "0 0 30 2 *", counting_action(counter))
            .await;
        assert!(matches!(
            result,
            Err(ScheduleError::UnsatisfiableExpression { .. })
        ));

        let tasks = scheduler.tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].schedule, "*/5 * * * *");
    }

    #[tokio::test]
    async fn test_remove_unknown_task_is_noop() {
        let scheduler = Scheduler::new(chrono_tz::UTC);
        scheduler
            .add_task("r1", "* * * * *", counting_action(Arc::default()))
            .await
            .unwrap();
        let before = scheduler.tasks().await;

        assert!(!scheduler.remove_task("unknown").await);
        assert_eq!(scheduler.tasks().await, before);

        assert!(scheduler.remove_task("r1").await);
        assert!(!scheduler.contains("r1").await);
        assert!(!scheduler.remove_task("r1").await);
    }

    #[tokio::test]
    async fn test_run_due_advances_next_fire() {
        let scheduler = Scheduler::new(chrono_tz::UTC);
        let counter = Arc::new(AtomicUsize::new(0));
        let first = scheduler
            .add_task("r1", "*/5 * * * *", counting_action(counter.clone()))
            .await
            .unwrap();

        assert!(scheduler.run_due(first - chrono::Duration::seconds(1)).await.is_empty());

        join_all(scheduler.run_due(first).await).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let next = scheduler.tasks().await[0].next_fire;
        assert_eq!(next, first + chrono::Duration::minutes(5));
        assert_eq!(scheduler.next_wakeup().await, Some(next));
    }

    #[tokio::test]
    async fn test_failures_and_panics_reach_sink() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Scheduler::with_failure_sink(chrono_tz::UTC, sink.clone());
        let healthy = Arc::new(AtomicUsize::new(0));

        scheduler
            .add_task(
                "failing",
                "* * * * *",
                action_fn(|| async { Err::<(), _>(anyhow::anyhow!("remote hung up")) }.boxed()),
            )
            .await
            .unwrap();
        scheduler
            .add_task(
                "panicking",
                "* * * * *",
                action_fn(|| {
                    async {
                        if true {
                            panic!("bad state");
                        }
                        Ok(())
                    }
                    .boxed()
                }),
            )
            .await
            .unwrap();
        scheduler
            .add_task("healthy", "* * * * *", counting_action(healthy.clone()))
            .await
            .unwrap();

        let due = scheduler.next_wakeup().await.unwrap();
        join_all(scheduler.run_due(due).await).await;

        assert_eq!(healthy.load(Ordering::SeqCst), 1);
        let mut reports = sink.reports.lock().unwrap().clone();
        reports.sort();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].0, "failing");
        assert!(reports[0].1.contains("remote hung up"));
        assert_eq!(reports[1].0, "panicking");
        assert!(reports[1].1.contains("bad state"));

        // All three tasks survive their failures
        assert_eq!(scheduler.tasks().await.len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_task_is_removed_and_reported() {
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Scheduler::with_failure_sink(chrono_tz::UTC, sink.clone());
        scheduler
            .add_task("yearly", "0 0 1 1 *", counting_action(Arc::default()))
            .await
            .unwrap();

        join_all(scheduler.run_due(DateTime::<Utc>::MAX_UTC).await).await;

        assert!(!scheduler.contains("yearly").await);
        let reports = sink.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].1.contains("task removed"));
    }

    #[tokio::test]
    async fn test_loop_wakes_for_new_task_and_stops() {
        let scheduler = Scheduler::new(chrono_tz::UTC);
        scheduler.start().await;
        scheduler.start().await;
        assert!(scheduler.is_running().await);

        // Loop is idle-sleeping; the registration must wake it
        let (tx, mut rx) = mpsc::unbounded_channel();
        scheduler
            .add_task(
                "every-second",
                "* * * * * *",
                action_fn(move || {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(());
                        Ok(())
                    }
                    .boxed()
                }),
            )
            .await
            .unwrap();

        let fired = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(matches!(fired, Ok(Some(()))));

        scheduler.stop().await;
        assert!(!scheduler.is_running().await);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_stop_does_not_wait_for_running_actions() {
        let scheduler = Scheduler::new(chrono_tz::UTC);
        let (tx, mut rx) = mpsc::unbounded_channel();
        scheduler
            .add_task(
                "slow",
                "* * * * * *",
                action_fn(move || {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(());
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(())
                    }
                    .boxed()
                }),
            )
            .await
            .unwrap();
        scheduler.start().await;

        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), scheduler.stop())
            .await
            .unwrap();
    }
}
