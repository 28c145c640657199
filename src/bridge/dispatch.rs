use crate::error::AppError;
use log::error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::{self, ThreadId};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Serialized queue owning the engine's thread. Everything that touches engine
/// state is posted here; callers on other threads never touch it directly.
pub struct DispatchQueue {
    name: String,
    sender: mpsc::Sender<Job>,
    thread_id: ThreadId,
}

impl DispatchQueue {
    pub fn new(name: &str) -> Result<Self, AppError> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let queue_name = name.to_string();
        let handle = thread::Builder::new().name(queue_name.clone()).spawn(move || {
            // Exits once every sender is dropped
            for job in receiver {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("Job on dispatch queue '{queue_name}' panicked");
                }
            }
        })?;

        Ok(Self {
            name: name.to_string(),
            sender,
            thread_id: handle.thread().id(),
        })
    }

    /// Enqueue without waiting. Returns false if the queue thread is gone.
    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.send(Box::new(job)).is_err() {
            error!("Dispatch queue '{}' is not running; job dropped", self.name);
            return false;
        }
        true
    }

    /// Run `job` on the queue and wait for its result. Runs inline when
    /// already on the queue thread, which would otherwise deadlock.
    pub fn run_sync<F, T>(&self, job: F) -> Result<T, AppError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_current() {
            return Ok(job());
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let posted = self.post(move || {
            // The waiting side only disappears if it was itself torn down
            let _ = tx.send(job());
        });
        if !posted {
            return Err(AppError::Engine(format!("dispatch queue '{}' stopped", self.name)));
        }

        rx.recv()
            .map_err(|_| AppError::Engine(format!("job on dispatch queue '{}' did not complete", self.name)))
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}
