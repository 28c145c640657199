//! Durable periodic work: the stand-in for the OS job scheduler that keeps the
//! reconciler firing across process deaths and reboots.

pub mod reconciler;
pub mod sqlite;

pub use reconciler::DurableReconciler;
pub use sqlite::SqliteWorkScheduler;

use crate::constants::MIN_RECONCILE_INTERVAL_MINS;
use crate::error::AppError;
use log::warn;
use std::time::Duration;

/// What to do when a task with the same unique name is already scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingWorkPolicy {
    /// Leave the existing task and its phase alone.
    Keep,
    /// Overwrite the existing task, restarting its phase.
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    KeptExisting,
    Replaced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    Success,
    Failure,
    Retry,
}

impl WorkOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkOutcome::Success => "success",
            WorkOutcome::Failure => "failure",
            WorkOutcome::Retry => "retry",
        }
    }
}

/// A unit of scheduled work. Each invocation may be the first thing a fresh process does.
pub trait Worker: Send + Sync {
    fn do_work(&self) -> WorkOutcome;
}

pub trait WorkScheduler: Send + Sync {
    fn enqueue_unique_periodic(
        &self,
        name: &str,
        interval: Duration,
        policy: ExistingWorkPolicy,
    ) -> Result<EnqueueOutcome, AppError>;

    /// Remove the named task. Cancelling an absent task is not an error.
    fn cancel_unique(&self, name: &str) -> Result<bool, AppError>;
}

fn min_interval() -> Duration {
    Duration::from_secs(MIN_RECONCILE_INTERVAL_MINS * 60)
}

/// Raise `interval` to the scheduler floor.
pub fn clamp_interval(interval: Duration) -> Duration {
    let floor = min_interval();
    if interval < floor {
        warn!("Interval {interval:?} is below the {floor:?} floor, clamping");
        return floor;
    }
    interval
}
