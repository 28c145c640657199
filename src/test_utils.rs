//! Shared test utilities for Snooper.
//!
//! Temporary databases plus in-memory doubles for every platform seam.

#![cfg(test)]

use crate::bridge::engine::ReplyHandler;
use crate::bridge::{CallHandler, CallbackLookup, Engine, EngineFactory, MessageTransport, MethodCall, Reply};
use crate::db::{migrations, Database};
use crate::error::{AppError, UsageError};
use crate::host::{HostLauncher, LaunchOutcome, NotificationChannel, StatusIndicator, StatusNotification};
use crate::models::{CallbackInfo, ForegroundSample, UsageRecord};
use crate::platform::{LabelResolver, UsageService};
use crate::tracker::SampleSink;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

/// Create a temporary test database with migrations applied.
///
/// Returns a tuple of (Database, TempDir). The TempDir must be kept alive
/// for the duration of the test to prevent the database file from being deleted.
pub fn setup_test_db() -> (Database, TempDir) {
    let dir = tempdir().expect("Failed to create temp directory for test DB");
    let db_path = dir.path().join("test.db");
    let db = Database::open(&db_path).expect("Failed to open test database");
    migrations::run(db.connection()).expect("Failed to run migrations on test DB");
    (db, dir)
}

/// Same as [`setup_test_db`], shared the way components hold it.
pub fn setup_shared_db() -> (Arc<Mutex<Database>>, TempDir) {
    let (db, dir) = setup_test_db();
    (Arc::new(Mutex::new(db)), dir)
}

/// One scripted answer from [`FakeUsageService`].
#[derive(Debug, Clone)]
pub enum UsageResponse {
    Records(Vec<UsageRecord>),
    Denied,
    Unavailable(String),
    Panic,
}

/// Usage service that plays back scripted responses; the last one repeats.
pub struct FakeUsageService {
    script: Mutex<VecDeque<UsageResponse>>,
    granted: bool,
    last_query: Mutex<Option<(i64, i64)>>,
    permission_requests: AtomicUsize,
}

impl FakeUsageService {
    pub fn scripted(responses: Vec<UsageResponse>) -> Self {
        let granted = !matches!(responses.last(), Some(UsageResponse::Denied) | None);
        Self {
            script: Mutex::new(responses.into()),
            granted,
            last_query: Mutex::new(None),
            permission_requests: AtomicUsize::new(0),
        }
    }

    pub fn granted(records: Vec<UsageRecord>) -> Self {
        Self::scripted(vec![UsageResponse::Records(records)])
    }

    pub fn denied() -> Self {
        Self::scripted(vec![UsageResponse::Denied])
    }

    pub fn failing(message: &str) -> Self {
        Self::scripted(vec![UsageResponse::Unavailable(message.to_string())])
    }

    pub fn last_query(&self) -> Option<(i64, i64)> {
        *self.last_query.lock().unwrap()
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> UsageResponse {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap_or(UsageResponse::Denied)
        }
    }
}

impl UsageService for FakeUsageService {
    fn query_usage(&self, begin_millis: i64, end_millis: i64) -> Result<Vec<UsageRecord>, UsageError> {
        *self.last_query.lock().unwrap() = Some((begin_millis, end_millis));
        match self.next_response() {
            UsageResponse::Records(records) => Ok(records),
            UsageResponse::Denied => Err(UsageError::PermissionDenied),
            UsageResponse::Unavailable(message) => Err(UsageError::Unavailable(message)),
            UsageResponse::Panic => panic!("usage service crashed"),
        }
    }

    fn has_permission(&self) -> bool {
        self.granted
    }

    fn request_permission(&self) {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeLabels {
    labels: HashMap<String, String>,
    panics: bool,
}

impl FakeLabels {
    pub fn with(labels: &[(&str, &str)]) -> Self {
        Self {
            labels: labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
            panics: false,
        }
    }

    pub fn panicking() -> Self {
        Self {
            labels: HashMap::new(),
            panics: true,
        }
    }
}

impl LabelResolver for FakeLabels {
    fn resolve_label(&self, identifier: &str) -> Option<String> {
        assert!(!self.panics, "label lookup crashed");
        self.labels.get(identifier).cloned()
    }
}

#[derive(Default)]
pub struct RecordingSink {
    samples: Mutex<Vec<ForegroundSample>>,
}

impl RecordingSink {
    pub fn samples(&self) -> Vec<ForegroundSample> {
        self.samples.lock().unwrap().clone()
    }
}

impl SampleSink for RecordingSink {
    fn deliver(&self, sample: ForegroundSample) {
        self.samples.lock().unwrap().push(sample);
    }
}

#[derive(Default)]
struct EngineLog {
    created: usize,
    live: usize,
    executed: Vec<(i64, String)>,
    sent: Vec<(String, MethodCall)>,
    /// Sends that came with a reply handler.
    awaited: usize,
    stopped: bool,
    reply: Option<Reply>,
    fail_next_create: bool,
    create_delay: Duration,
    handlers: HashMap<String, CallHandler>,
}

/// Engine factory whose engines record traffic instead of running anything.
#[derive(Default)]
pub struct FakeEngineFactory {
    log: Arc<Mutex<EngineLog>>,
}

impl FakeEngineFactory {
    pub fn created(&self) -> usize {
        self.log.lock().unwrap().created
    }

    /// Engines constructed and not yet dropped.
    pub fn live(&self) -> usize {
        self.log.lock().unwrap().live
    }

    pub fn executed(&self) -> Vec<(i64, String)> {
        self.log.lock().unwrap().executed.clone()
    }

    pub fn sent(&self) -> Vec<(String, MethodCall)> {
        self.log.lock().unwrap().sent.clone()
    }

    pub fn awaited_replies(&self) -> usize {
        self.log.lock().unwrap().awaited
    }

    /// Make every live engine report that it has exited.
    pub fn stop_engines(&self) {
        self.log.lock().unwrap().stopped = true;
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.log.lock().unwrap().create_delay = delay;
    }

    pub fn fail_next_create(&self) {
        self.log.lock().unwrap().fail_next_create = true;
    }

    /// Answer every call with `reply` instead of an empty success.
    pub fn reply_with(&self, reply: Reply) {
        self.log.lock().unwrap().reply = Some(reply);
    }

    /// Make a call from the engine side on `channel`.
    pub fn call_native(&self, channel: &str, call: MethodCall) -> Option<Reply> {
        let handler = self.log.lock().unwrap().handlers.get(channel).cloned();
        handler.map(|handler| handler(call))
    }
}

impl EngineFactory for FakeEngineFactory {
    fn create(&self) -> Result<Box<dyn Engine>, AppError> {
        let delay = self.log.lock().unwrap().create_delay;
        thread::sleep(delay);

        let mut log = self.log.lock().unwrap();
        if log.fail_next_create {
            log.fail_next_create = false;
            return Err(AppError::Engine("engine failed to start".into()));
        }
        log.created += 1;
        log.live += 1;
        log.stopped = false;
        Ok(Box::new(FakeEngine {
            transport: Arc::new(FakeTransport {
                log: Arc::clone(&self.log),
            }),
        }))
    }
}

struct FakeEngine {
    transport: Arc<FakeTransport>,
}

impl Engine for FakeEngine {
    fn execute_callback(&self, entry: &CallbackInfo, handle: i64) -> Result<(), AppError> {
        self.transport
            .log
            .lock()
            .unwrap()
            .executed
            .push((handle, entry.entry_point.clone()));
        Ok(())
    }

    fn transport(&self) -> Arc<dyn MessageTransport> {
        Arc::clone(&self.transport) as Arc<dyn MessageTransport>
    }

    fn is_running(&self) -> bool {
        !self.transport.log.lock().unwrap().stopped
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        let mut log = self.transport.log.lock().unwrap();
        log.live = log.live.saturating_sub(1);
    }
}

struct FakeTransport {
    log: Arc<Mutex<EngineLog>>,
}

impl MessageTransport for FakeTransport {
    fn send(&self, channel: &str, call: MethodCall, reply: Option<ReplyHandler>) -> Result<(), AppError> {
        let answer = {
            let mut log = self.log.lock().unwrap();
            log.sent.push((channel.to_string(), call));
            if reply.is_some() {
                log.awaited += 1;
            }
            log.reply.clone().unwrap_or(Reply::success(Value::Null))
        };
        if let Some(reply) = reply {
            reply(answer);
        }
        Ok(())
    }

    fn set_call_handler(&self, channel: &str, handler: Option<CallHandler>) {
        let mut log = self.log.lock().unwrap();
        match handler {
            Some(handler) => {
                log.handlers.insert(channel.to_string(), handler);
            }
            None => {
                log.handlers.remove(channel);
            }
        }
    }
}

#[derive(Default)]
pub struct FakeLookup {
    entries: Mutex<HashMap<i64, CallbackInfo>>,
}

impl FakeLookup {
    pub fn add(&self, handle: i64, program: &str, entry_point: &str) {
        self.entries.lock().unwrap().insert(
            handle,
            CallbackInfo {
                handle,
                program: program.to_string(),
                entry_point: entry_point.to_string(),
            },
        );
    }
}

impl CallbackLookup for FakeLookup {
    fn lookup(&self, handle: i64) -> Result<Option<CallbackInfo>, AppError> {
        Ok(self.entries.lock().unwrap().get(&handle).cloned())
    }
}

#[derive(Default)]
pub struct FakeLauncher {
    starts: AtomicUsize,
    stops: AtomicUsize,
    failing: AtomicBool,
}

impl FakeLauncher {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn fail_starts(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl HostLauncher for FakeLauncher {
    fn ensure_running(&self) -> Result<LaunchOutcome, AppError> {
        let previous = self.starts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "host executable missing",
            )));
        }
        Ok(if previous == 0 {
            LaunchOutcome::Started { pid: 4242 }
        } else {
            LaunchOutcome::AlreadyRunning { pid: 4242 }
        })
    }

    fn request_stop(&self) -> Result<bool, AppError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndicatorEvent {
    Channel(String),
    Show(u32),
    Clear(u32),
}

#[derive(Default)]
pub struct RecordingIndicator {
    events: Mutex<Vec<IndicatorEvent>>,
}

impl RecordingIndicator {
    pub fn events(&self) -> Vec<IndicatorEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl StatusIndicator for RecordingIndicator {
    fn create_channel(&self, channel: &NotificationChannel) -> Result<(), AppError> {
        self.events.lock().unwrap().push(IndicatorEvent::Channel(channel.id.clone()));
        Ok(())
    }

    fn show(&self, notification: &StatusNotification) -> Result<(), AppError> {
        self.events.lock().unwrap().push(IndicatorEvent::Show(notification.id));
        Ok(())
    }

    fn clear(&self, id: u32) -> Result<(), AppError> {
        self.events.lock().unwrap().push(IndicatorEvent::Clear(id));
        Ok(())
    }
}
