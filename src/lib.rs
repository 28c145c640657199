pub mod app;
pub mod bridge;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod host;
pub mod models;
pub mod platform;
#[cfg(test)]
mod test_utils;
pub mod tracker;
pub mod work;

use log::warn;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

pub use app::{InitError, Snooper, StatusReport};
pub use config::Config;
pub use error::AppError;

/// Lock a mutex, recovering from poisoning.
pub(crate) fn safe_lock<'a, T>(mutex: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("{context} mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn since_epoch() -> std::time::Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

/// Wall clock in unix milliseconds.
pub fn unix_millis() -> i64 {
    i64::try_from(since_epoch().as_millis()).unwrap_or(i64::MAX)
}

/// Wall clock in unix seconds.
pub fn unix_secs() -> i64 {
    i64::try_from(since_epoch().as_secs()).unwrap_or(i64::MAX)
}
