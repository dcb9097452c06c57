//! Schedule expressions and the periodic scheduler
//!
//! - `expression`: cron-style expression parsing and next-fire computation
//! - `scheduler`: keyed task set with a dispatch loop
//! - `types`: actions, failure reporting and task snapshots

pub mod expression;
pub mod scheduler;
pub mod types;

pub use expression::{LOOKAHEAD_YEARS, ScheduleExpression};
pub use scheduler::Scheduler;
pub use types::{
    FailureSink, FnAction, ScheduledAction, TaskFailure, TaskSnapshot, TracingFailureSink,
    action_fn,
};
