use super::{clamp_interval, EnqueueOutcome, ExistingWorkPolicy, WorkOutcome, WorkScheduler, Worker};
use crate::bridge::{CrossBoundaryBridge, InitOutcome};
use crate::constants::RECONCILE_WORK_NAME;
use crate::error::{is_busy, AppError};
use crate::host::{HostLauncher, LaunchOutcome};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Periodic work that re-arms everything: keeps the host alive and resyncs the engine.
///
/// Holds no state between runs; everything it needs comes from durable storage.
pub struct DurableReconciler {
    launcher: Arc<dyn HostLauncher>,
    bridge: Arc<CrossBoundaryBridge>,
}

impl DurableReconciler {
    pub fn new(launcher: Arc<dyn HostLauncher>, bridge: Arc<CrossBoundaryBridge>) -> Self {
        Self { launcher, bridge }
    }

    /// Register the reconciler under its unique name, keeping any existing registration.
    pub fn schedule(scheduler: &dyn WorkScheduler, interval: Duration) -> Result<EnqueueOutcome, AppError> {
        scheduler.enqueue_unique_periodic(RECONCILE_WORK_NAME, clamp_interval(interval), ExistingWorkPolicy::Keep)
    }

    pub fn cancel(scheduler: &dyn WorkScheduler) -> Result<bool, AppError> {
        scheduler.cancel_unique(RECONCILE_WORK_NAME)
    }

    /// One invocation. The resync runs even if the host could not be started.
    pub fn reconcile(&self) -> Result<InitOutcome, AppError> {
        let (launched, resynced) = self.run_steps();
        let outcome = resynced?;
        launched?;
        Ok(outcome)
    }

    fn run_steps(&self) -> (Result<LaunchOutcome, AppError>, Result<InitOutcome, AppError>) {
        let launched = self.launcher.ensure_running();
        match &launched {
            Ok(outcome) => info!("Keep-alive host: {outcome:?}"),
            Err(e) => warn!("Could not start keep-alive host: {e}"),
        }
        (launched, self.bridge.resync_now())
    }
}

impl Worker for DurableReconciler {
    /// A host that failed to start is retried on the backoff schedule rather
    /// than reported as a failure; only a failed resync is.
    fn do_work(&self) -> WorkOutcome {
        match self.run_steps() {
            (_, Err(e)) => {
                let outcome = outcome_for_error(&e);
                error!("Reconcile failed ({}): {e}", outcome.as_str());
                outcome
            }
            (Err(_), Ok(outcome)) => {
                warn!("Reconcile resynced ({outcome:?}) without a keep-alive host; retrying");
                WorkOutcome::Retry
            }
            (Ok(_), Ok(outcome)) => {
                info!("Reconcile finished ({outcome:?})");
                WorkOutcome::Success
            }
        }
    }
}

/// A locked database clears up on its own; anything else is reported as a failure.
fn outcome_for_error(e: &AppError) -> WorkOutcome {
    match e {
        AppError::Storage(inner) if is_busy(inner) => WorkOutcome::Retry,
        AppError::InvalidArgument { .. }
        | AppError::Storage(_)
        | AppError::Io(_)
        | AppError::Codec(_)
        | AppError::ExecutorShutdown
        | AppError::LockPoisoned
        | AppError::Engine(_)
        | AppError::Internal(_) => WorkOutcome::Failure,
    }
}
