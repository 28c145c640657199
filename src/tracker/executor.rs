//! A single-thread executor for periodic work.
//!
//! Each executor owns one worker thread. Tasks run at a fixed rate on that
//! thread, one at a time. `shutdown` lets the running task finish, stops all
//! periodic tasks and rejects further scheduling with
//! [`AppError::ExecutorShutdown`].

use crate::error::AppError;
use crate::safe_lock;
use log::{debug, error};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Task = Box<dyn FnMut() + Send + 'static>;

enum Command {
    Schedule {
        initial_delay: Duration,
        period: Duration,
        task: Task,
    },
    Shutdown,
}

struct Periodic {
    next: Instant,
    period: Duration,
    task: Task,
}

pub struct ScheduledExecutor {
    name: String,
    sender: mpsc::Sender<Command>,
    shutdown: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledExecutor {
    pub fn new(name: &str) -> Result<Self, AppError> {
        let (sender, receiver) = mpsc::channel();
        let thread_name = name.to_string();
        let worker = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run_worker(&thread_name, &receiver))?;

        Ok(Self {
            name: name.to_string(),
            sender,
            shutdown: AtomicBool::new(false),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Run `task` after `initial_delay`, then every `period` measured from the
    /// previous scheduled start. Periods missed while a task overran are skipped.
    pub fn schedule_at_fixed_rate<F>(&self, initial_delay: Duration, period: Duration, task: F) -> Result<(), AppError>
    where
        F: FnMut() + Send + 'static,
    {
        if period.is_zero() {
            return Err(AppError::InvalidArgument {
                field: "period",
                reason: "must be positive".into(),
            });
        }
        if self.is_shutdown() {
            error!("Rejected task: executor '{}' has been shut down", self.name);
            return Err(AppError::ExecutorShutdown);
        }

        self.sender
            .send(Command::Schedule {
                initial_delay,
                period,
                task: Box::new(task),
            })
            .map_err(|_| {
                error!("Rejected task: executor '{}' worker has exited", self.name);
                AppError::ExecutorShutdown
            })
    }

    /// Stop accepting work. The task currently running, if any, completes.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Shutting down executor '{}'", self.name);
        // The worker may already be gone; nothing left to stop in that case
        let _ = self.sender.send(Command::Shutdown);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Wait for the worker thread to exit after `shutdown`. Returns false on timeout.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = safe_lock(&self.worker, "Executor worker");

        let Some(handle) = guard.as_ref() else {
            return true;
        };
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }

        if let Some(handle) = guard.take() {
            if handle.join().is_err() {
                error!("Executor '{}' worker panicked", self.name);
            }
        }
        true
    }
}

impl Drop for ScheduledExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(name: &str, receiver: &mpsc::Receiver<Command>) {
    let mut tasks: Vec<Periodic> = Vec::new();

    loop {
        let command = match tasks.iter().map(|t| t.next).min() {
            Some(next) => {
                let wait = next.saturating_duration_since(Instant::now());
                match receiver.recv_timeout(wait) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match receiver.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        match command {
            Some(Command::Schedule {
                initial_delay,
                period,
                task,
            }) => tasks.push(Periodic {
                next: Instant::now() + initial_delay,
                period,
                task,
            }),
            Some(Command::Shutdown) => break,
            None => run_due(name, &mut tasks),
        }
    }

    debug!("Executor '{name}' stopped");
}

fn run_due(name: &str, tasks: &mut [Periodic]) {
    for periodic in tasks.iter_mut() {
        let now = Instant::now();
        if periodic.next > now {
            continue;
        }

        let task = &mut periodic.task;
        if panic::catch_unwind(AssertUnwindSafe(|| task())).is_err() {
            error!("Periodic task on executor '{name}' panicked; it stays scheduled");
        }

        let now = Instant::now();
        while periodic.next <= now {
            periodic.next += periodic.period;
        }
    }
}
