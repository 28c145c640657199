use super::{clamp_interval, EnqueueOutcome, ExistingWorkPolicy, WorkOutcome, WorkScheduler, Worker};
use crate::constants::{BACKOFF_INITIAL_SECS, BACKOFF_MAX_SECS};
use crate::db::{with_connection, Database};
use crate::error::AppError;
use crate::models::WorkTask;
use crate::unix_secs;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Work scheduler persisted in the `work_tasks` table.
///
/// Nothing here wakes up on its own: `run_due` is driven from outside, by a cron
/// entry or systemd timer invoking `snooper run-due`. All timestamps are unix seconds.
#[derive(Clone)]
pub struct SqliteWorkScheduler {
    db: Arc<Mutex<Database>>,
}

impl SqliteWorkScheduler {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    pub fn enqueue_at(
        &self,
        name: &str,
        interval: Duration,
        policy: ExistingWorkPolicy,
        now: i64,
    ) -> Result<EnqueueOutcome, AppError> {
        let interval_secs = i64::try_from(clamp_interval(interval).as_secs()).map_err(|_| AppError::InvalidArgument {
            field: "interval",
            reason: "too large".into(),
        })?;
        let task = WorkTask::new(name, interval_secs, now);

        let outcome = with_connection(&self.db, "enqueue work", |conn| match policy {
            ExistingWorkPolicy::Keep => Ok(if task.insert_if_absent(conn)? {
                EnqueueOutcome::Enqueued
            } else {
                EnqueueOutcome::KeptExisting
            }),
            ExistingWorkPolicy::Replace => {
                let existed = WorkTask::find_by_name(conn, name)?.is_some();
                task.upsert(conn)?;
                Ok(if existed {
                    EnqueueOutcome::Replaced
                } else {
                    EnqueueOutcome::Enqueued
                })
            }
        })?;

        match outcome {
            EnqueueOutcome::KeptExisting => debug!("Work '{name}' already scheduled, keeping it"),
            EnqueueOutcome::Enqueued | EnqueueOutcome::Replaced => {
                info!("Scheduled work '{name}' every {interval_secs}s ({outcome:?})");
            }
        }
        Ok(outcome)
    }

    pub fn task(&self, name: &str) -> Result<Option<WorkTask>, AppError> {
        with_connection(&self.db, "load work", |conn| WorkTask::find_by_name(conn, name))
    }

    pub fn tasks(&self) -> Result<Vec<WorkTask>, AppError> {
        with_connection(&self.db, "list work", WorkTask::find_all)
    }

    pub fn due(&self, now: i64) -> Result<Vec<WorkTask>, AppError> {
        with_connection(&self.db, "list due work", |conn| WorkTask::find_due(conn, now))
    }

    /// Book the result of a run. Returns false if the task was cancelled while it ran.
    pub fn record_outcome(&self, name: &str, outcome: WorkOutcome, now: i64) -> Result<bool, AppError> {
        with_connection(&self.db, "record work outcome", |conn| {
            let Some(mut task) = WorkTask::find_by_name(conn, name)? else {
                return Ok(false);
            };

            match outcome {
                WorkOutcome::Success => {
                    task.next_run_at = next_in_phase(&task, now);
                    task.run_attempt = 0;
                }
                WorkOutcome::Failure | WorkOutcome::Retry => {
                    task.next_run_at = now.saturating_add(backoff_delay(task.run_attempt));
                    task.run_attempt = task.run_attempt.saturating_add(1);
                }
            }
            task.last_run_at = Some(now);
            task.last_outcome = Some(outcome.as_str().to_string());
            task.update_run_state(conn)
        })
    }

    /// Run every due task that has a worker, recording each outcome.
    pub fn run_due(
        &self,
        now: i64,
        workers: &HashMap<String, Arc<dyn Worker>>,
    ) -> Result<Vec<(String, WorkOutcome)>, AppError> {
        let mut results = Vec::new();
        for task in self.due(now)? {
            let Some(worker) = workers.get(&task.name) else {
                warn!("No worker registered for due work '{}'", task.name);
                continue;
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.do_work())).unwrap_or_else(|_| {
                error!("Work '{}' panicked", task.name);
                WorkOutcome::Failure
            });
            if !self.record_outcome(&task.name, outcome, now)? {
                debug!("Work '{}' was cancelled while running", task.name);
            }
            results.push((task.name, outcome));
        }
        Ok(results)
    }
}

impl WorkScheduler for SqliteWorkScheduler {
    fn enqueue_unique_periodic(
        &self,
        name: &str,
        interval: Duration,
        policy: ExistingWorkPolicy,
    ) -> Result<EnqueueOutcome, AppError> {
        self.enqueue_at(name, interval, policy, unix_secs())
    }

    fn cancel_unique(&self, name: &str) -> Result<bool, AppError> {
        let removed = with_connection(&self.db, "cancel work", |conn| WorkTask::delete(conn, name))?;
        if removed {
            info!("Cancelled work '{name}'");
        }
        Ok(removed)
    }
}

/// First slot of the task's original phase strictly after `now`.
fn next_in_phase(task: &WorkTask, now: i64) -> i64 {
    let interval = task.interval_secs.max(1);
    if now < task.enqueued_at {
        return task.enqueued_at;
    }
    let elapsed_periods = (now - task.enqueued_at) / interval;
    task.enqueued_at
        .saturating_add(elapsed_periods.saturating_add(1).saturating_mul(interval))
}

/// 30s doubled per previous attempt, capped at five hours.
fn backoff_delay(attempt: i64) -> i64 {
    u32::try_from(attempt)
        .ok()
        .and_then(|exp| 2_i64.checked_pow(exp))
        .and_then(|factor| BACKOFF_INITIAL_SECS.checked_mul(factor))
        .map_or(BACKOFF_MAX_SECS, |delay| delay.min(BACKOFF_MAX_SECS))
}
