pub mod executor;
pub mod probe;

pub use executor::ScheduledExecutor;
pub use probe::UsageWindowProbe;

use crate::error::AppError;
use crate::models::ForegroundSample;
use crate::platform::LabelResolver;
use log::{debug, error};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Receives samples from the observer. Must not block.
pub trait SampleSink: Send + Sync {
    fn deliver(&self, sample: ForegroundSample);
}

/// Polls the probe and forwards what it sees to a sink.
pub struct ForegroundObserver {
    probe: UsageWindowProbe,
    labels: Arc<dyn LabelResolver>,
    sink: Arc<dyn SampleSink>,
}

impl ForegroundObserver {
    pub fn new(probe: UsageWindowProbe, labels: Arc<dyn LabelResolver>, sink: Arc<dyn SampleSink>) -> Self {
        Self { probe, labels, sink }
    }

    /// One observation cycle. Never panics; returns the delivered sample, if any.
    pub fn tick(&self) -> Option<ForegroundSample> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.poll_once())) {
            Ok(delivered) => delivered,
            Err(_) => {
                error!("Error monitoring apps: observation tick panicked");
                None
            }
        }
    }

    fn poll_once(&self) -> Option<ForegroundSample> {
        let mut sample = self.probe.sample()?;
        debug!("Current foreground app: {}", sample.identifier);

        // Label lookup is best-effort; a failing resolver leaves the identifier as the label
        let label = panic::catch_unwind(AssertUnwindSafe(|| self.labels.resolve_label(&sample.identifier)))
            .ok()
            .flatten();
        if let Some(label) = label {
            sample.display_name = label;
        }

        self.sink.deliver(sample.clone());
        Some(sample)
    }

    /// Tick immediately, then every `period` on `executor`.
    pub fn start(self: &Arc<Self>, executor: &ScheduledExecutor, period: Duration) -> Result<(), AppError> {
        let observer = Arc::clone(self);
        executor.schedule_at_fixed_rate(Duration::ZERO, period, move || {
            observer.tick();
        })
    }
}
