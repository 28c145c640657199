//! Keep-alive host: owns the observer's executor and the visible status indicator.

pub mod indicator;
pub mod launcher;

pub use indicator::{NotificationChannel, StatusFile, StatusIndicator, StatusNotification, StatusRecord};
pub use launcher::{HostLauncher, HostRecord, LaunchOutcome, ProcessHostLauncher};

use crate::constants::STATUS_NOTIFICATION_ID;
use crate::error::AppError;
use crate::safe_lock;
use crate::tracker::{ForegroundObserver, ScheduledExecutor};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long destroy waits for an in-flight tick.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Created,
    Foregrounded,
    Destroyed,
}

/// What the platform should do if it kills the host for resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Restart the host when resources allow.
    Sticky,
    NotSticky,
}

struct Lifecycle {
    state: HostState,
    observing: bool,
}

pub struct KeepAliveHost {
    indicator: Arc<dyn StatusIndicator>,
    observer: Arc<ForegroundObserver>,
    poll_interval: Duration,
    executor: ScheduledExecutor,
    lifecycle: Mutex<Lifecycle>,
}

impl KeepAliveHost {
    /// Set up the status channel and go foreground with the persistent status indicator.
    pub fn create(
        indicator: Arc<dyn StatusIndicator>,
        observer: Arc<ForegroundObserver>,
        poll_interval: Duration,
    ) -> Result<Self, AppError> {
        let host = Self {
            indicator,
            observer,
            poll_interval,
            executor: ScheduledExecutor::new("foreground-observer")?,
            lifecycle: Mutex::new(Lifecycle {
                state: HostState::Created,
                observing: false,
            }),
        };

        host.indicator.create_channel(&NotificationChannel::status())?;
        host.indicator.show(&StatusNotification::running())?;
        safe_lock(&host.lifecycle, "Host lifecycle").state = HostState::Foregrounded;
        info!("Keep-alive host is in the foreground");
        Ok(host)
    }

    /// Handle a (re)start command. The observer is started at most once.
    pub fn on_start_command(&self) -> Result<StartMode, AppError> {
        let mut lifecycle = safe_lock(&self.lifecycle, "Host lifecycle");
        match lifecycle.state {
            HostState::Destroyed => return Err(AppError::ExecutorShutdown),
            HostState::Created | HostState::Foregrounded => {}
        }
        if !lifecycle.observing {
            self.observer.start(&self.executor, self.poll_interval)?;
            lifecycle.observing = true;
            info!("Foreground observer started (every {:?})", self.poll_interval);
        }
        Ok(StartMode::Sticky)
    }

    /// Stop the observer and remove the status indicator. Safe to call more than once.
    pub fn on_destroy(&self) {
        let mut lifecycle = safe_lock(&self.lifecycle, "Host lifecycle");
        if lifecycle.state == HostState::Destroyed {
            return;
        }

        self.executor.shutdown();
        if !self.executor.await_termination(SHUTDOWN_GRACE) {
            warn!("Observer tick still running after {SHUTDOWN_GRACE:?}");
        }
        if let Err(e) = self.indicator.clear(STATUS_NOTIFICATION_ID) {
            warn!("Failed to clear status indicator: {e}");
        }
        lifecycle.state = HostState::Destroyed;
        lifecycle.observing = false;
        info!("Keep-alive host destroyed");
    }

    pub fn state(&self) -> HostState {
        safe_lock(&self.lifecycle, "Host lifecycle").state
    }
}

impl Drop for KeepAliveHost {
    fn drop(&mut self) {
        self.on_destroy();
    }
}

/// Read a JSON file, `None` if it does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, AppError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&data)?))
}

/// Write JSON through a temp file so readers never see a partial record.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let payload = serde_json::to_vec_pretty(value)?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, payload)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UsageRecord;
    use crate::test_utils::{FakeLabels, FakeUsageService, IndicatorEvent, RecordingIndicator, RecordingSink};
    use crate::tracker::UsageWindowProbe;
    use std::thread;

    fn host(indicator: &Arc<RecordingIndicator>) -> (KeepAliveHost, Arc<RecordingSink>) {
        let service = Arc::new(FakeUsageService::granted(vec![UsageRecord::new("pkg.a", i64::MAX)]));
        let sink = Arc::new(RecordingSink::default());
        let observer = ForegroundObserver::new(
            UsageWindowProbe::new(service, Duration::from_secs(10)),
            Arc::new(FakeLabels::default()),
            Arc::clone(&sink) as Arc<dyn crate::tracker::SampleSink>,
        );
        let host = KeepAliveHost::create(
            Arc::clone(indicator) as Arc<dyn StatusIndicator>,
            Arc::new(observer),
            Duration::from_secs(3600),
        )
        .unwrap();
        (host, sink)
    }

    fn wait_for_samples(sink: &RecordingSink, count: usize) {
        for _ in 0..100 {
            if sink.samples().len() >= count {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_create_goes_foreground_with_indicator() {
        let indicator = Arc::new(RecordingIndicator::default());
        let (host, _sink) = host(&indicator);

        assert_eq!(host.state(), HostState::Foregrounded);
        assert_eq!(
            indicator.events(),
            vec![
                IndicatorEvent::Channel(crate::constants::STATUS_CHANNEL_ID.to_string()),
                IndicatorEvent::Show(STATUS_NOTIFICATION_ID),
            ]
        );
    }

    #[test]
    fn test_restart_commands_start_observer_once() {
        let indicator = Arc::new(RecordingIndicator::default());
        let (host, sink) = host(&indicator);

        assert_eq!(host.on_start_command().unwrap(), StartMode::Sticky);
        assert_eq!(host.on_start_command().unwrap(), StartMode::Sticky);
        wait_for_samples(&sink, 1);
        thread::sleep(Duration::from_millis(50));

        assert_eq!(sink.samples().len(), 1);
        assert_eq!(sink.samples()[0].identifier, "pkg.a");
    }

    #[test]
    fn test_destroy_clears_indicator_and_rejects_restart() {
        let indicator = Arc::new(RecordingIndicator::default());
        let (host, _sink) = host(&indicator);
        host.on_start_command().unwrap();

        host.on_destroy();
        host.on_destroy();

        assert_eq!(host.state(), HostState::Destroyed);
        assert!(matches!(host.on_start_command(), Err(AppError::ExecutorShutdown)));
        let clears = indicator
            .events()
            .into_iter()
            .filter(|e| *e == IndicatorEvent::Clear(STATUS_NOTIFICATION_ID))
            .count();
        assert_eq!(clears, 1);
    }

    #[test]
    fn test_drop_destroys() {
        let indicator = Arc::new(RecordingIndicator::default());
        let (host, _sink) = host(&indicator);
        drop(host);

        assert_eq!(indicator.events().last(), Some(&IndicatorEvent::Clear(STATUS_NOTIFICATION_ID)));
    }

    #[test]
    fn test_json_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("value.json");

        assert_eq!(read_json::<Vec<u32>>(&path).unwrap(), None);
        write_json_atomic(&path, &vec![1_u32, 2, 3]).unwrap();
        assert_eq!(read_json::<Vec<u32>>(&path).unwrap(), Some(vec![1, 2, 3]));
        assert!(!path.with_extension("tmp").exists());
    }
}
