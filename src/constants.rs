// src/constants.rs

/// Fixed period between foreground observations.
pub const POLL_INTERVAL_SECS: u64 = 5;

/// Trailing window queried from the usage service (10 seconds).
pub const USAGE_WINDOW_SECS: u64 = 10;

/// Floor for the periodic reconciler interval; the scheduler never runs work more often.
pub const MIN_RECONCILE_INTERVAL_MINS: u64 = 15;

/// Unique name the reconciler is registered under.
pub const RECONCILE_WORK_NAME: &str = "com.app.snooper.background_notification_work";

/// Preference key holding the persisted callback handle.
pub const CALLBACK_HANDLE_KEY: &str = "callback_handle";

/// Native -> engine channel.
pub const BACKGROUND_CHANNEL: &str = "com.app.snooper/background";

/// Engine -> native channel.
pub const NATIVE_CHANNEL: &str = "com.app.snooper/native";

pub const STATUS_CHANNEL_ID: &str = "com.app.snooper.notification_channel";
pub const STATUS_CHANNEL_NAME: &str = "Snooper Background Service";
pub const STATUS_NOTIFICATION_ID: u32 = 1001;

/// Frames larger than this are rejected (1MB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// First retry delay after a failed work run.
pub const BACKOFF_INITIAL_SECS: i64 = 30;

/// Upper bound for the exponential retry delay (5 hours).
pub const BACKOFF_MAX_SECS: i64 = 5 * 60 * 60;

/// Environment variable naming the entry point a spawned engine should run.
pub const ENTRY_POINT_ENV: &str = "SNOOPER_ENTRY_POINT";
