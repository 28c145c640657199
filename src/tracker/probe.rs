use crate::error::UsageError;
use crate::models::{ForegroundSample, UsageRecord};
use crate::platform::UsageService;
use crate::unix_millis;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// Reports the most recently used identifier within a trailing window.
pub struct UsageWindowProbe {
    service: Arc<dyn UsageService>,
    window: Duration,
}

impl UsageWindowProbe {
    pub fn new(service: Arc<dyn UsageService>, window: Duration) -> Self {
        Self { service, window }
    }

    pub fn sample(&self) -> Option<ForegroundSample> {
        self.sample_at(unix_millis())
    }

    /// Query `[now - window, now]`. Denied access and empty results both yield `None`.
    pub fn sample_at(&self, now_millis: i64) -> Option<ForegroundSample> {
        let window_millis = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        let begin = now_millis.saturating_sub(window_millis);

        match self.service.query_usage(begin, now_millis) {
            Ok(records) => most_recent(records).map(|r| ForegroundSample::new(&r.identifier, now_millis)),
            Err(UsageError::PermissionDenied) => {
                debug!("Usage access not granted; skipping sample");
                None
            }
            Err(e @ UsageError::Unavailable(_)) => {
                warn!("Usage query failed: {e}");
                None
            }
        }
    }
}

/// The record with the greatest last-used time. Equal timestamps resolve to
/// whichever the platform listed last; sub-window ordering is not meaningful.
fn most_recent(records: Vec<UsageRecord>) -> Option<UsageRecord> {
    records.into_iter().max_by_key(|r| r.last_time_used_millis)
}
