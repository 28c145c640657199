//! Wires the components together for one process. Every subcommand opens a fresh
//! [`Snooper`]: nothing survives between invocations except what is on disk.

use crate::bridge::{
    CallbackLookup, CallbackRegistry, CallbackStore, CrossBoundaryBridge, DispatchQueue, EngineFactory, InitOutcome,
    NativeApi, ProcessEngineFactory,
};
use crate::config::{Config, ConfigError};
use crate::constants::RECONCILE_WORK_NAME;
use crate::db::{migrations, Database};
use crate::error::AppError;
use crate::host::{
    HostLauncher, HostRecord, KeepAliveHost, ProcessHostLauncher, StatusFile, StatusIndicator, StatusRecord,
};
use crate::models::{CallbackReference, WorkTask};
use crate::platform::{DesktopEntryResolver, NativeUsageService, UsageService};
use crate::tracker::{ForegroundObserver, SampleSink, UsageWindowProbe};
use crate::unix_secs;
use crate::work::{DurableReconciler, EnqueueOutcome, SqliteWorkScheduler, WorkOutcome, Worker};
use log::{debug, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;

const STATUS_FILE: &str = "status.json";

/// How often the host checks for a stop request.
const STOP_POLL: Duration = Duration::from_secs(1);

/// Stop polls between attempts to attach an engine while none is running.
const ATTACH_RETRY_POLLS: u32 = 30;

/// Error type for startup failures
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to open database: {0}")]
    DatabaseOpen(rusqlite::Error),

    #[error("Failed to run database migrations: {0}")]
    Migration(rusqlite::Error),

    #[error(transparent)]
    Runtime(#[from] AppError),
}

/// Snapshot printed by `snooper status`.
#[derive(Debug)]
pub struct StatusReport {
    pub host: Option<HostRecord>,
    pub indicator: Option<StatusRecord>,
    pub callback: Option<CallbackReference>,
    pub work: Vec<WorkTask>,
    pub permission: bool,
}

pub struct Snooper {
    config: Config,
    data_dir: PathBuf,
    usage: Arc<dyn UsageService>,
    callbacks: CallbackStore,
    registry: CallbackRegistry,
    launcher: Arc<ProcessHostLauncher>,
    bridge: Arc<CrossBoundaryBridge>,
    scheduler: SqliteWorkScheduler,
}

impl Snooper {
    /// Open storage and build every component. `host_args` is how this executable
    /// is re-invoked to run the keep-alive host.
    pub fn open(config: Config, host_args: Vec<OsString>) -> Result<Self, InitError> {
        let data_dir = config.data_dir()?;
        let db = Database::open(&config.db_path()?).map_err(InitError::DatabaseOpen)?;
        migrations::run(db.connection()).map_err(InitError::Migration)?;
        let db = Arc::new(Mutex::new(db));

        let usage: Arc<dyn UsageService> = Arc::new(NativeUsageService::new());
        let exe = std::env::current_exe().map_err(AppError::Io)?;
        let launcher = Arc::new(ProcessHostLauncher::new(data_dir.clone(), exe, host_args));
        let callbacks = CallbackStore::new(Arc::clone(&db));
        let registry = CallbackRegistry::new(Arc::clone(&db));

        let queue = Arc::new(DispatchQueue::new("engine-dispatch")?);
        let native_api = NativeApi::new(
            Arc::clone(&launcher) as Arc<dyn HostLauncher>,
            Arc::clone(&usage),
            callbacks.clone(),
        );
        let bridge = CrossBoundaryBridge::new(
            callbacks.clone(),
            Arc::new(registry.clone()) as Arc<dyn CallbackLookup>,
            Arc::new(ProcessEngineFactory::new(Arc::clone(&queue))) as Arc<dyn EngineFactory>,
            queue,
        )
        .with_native_handler(native_api.into_handler());

        Ok(Self {
            config,
            data_dir,
            usage,
            callbacks,
            registry,
            launcher,
            bridge: Arc::new(bridge),
            scheduler: SqliteWorkScheduler::new(db),
        })
    }

    fn status_file(&self) -> StatusFile {
        StatusFile::new(self.data_dir.join(STATUS_FILE))
    }

    fn reconciler(&self) -> DurableReconciler {
        DurableReconciler::new(
            Arc::clone(&self.launcher) as Arc<dyn HostLauncher>,
            Arc::clone(&self.bridge),
        )
    }

    /// Run the keep-alive host in this process until a stop request, SIGTERM or SIGINT arrives.
    pub fn run_host(&self) -> Result<(), AppError> {
        let signalled = stop_signal()?;
        if let Some(rival) = self.launcher.register_current()? {
            info!("Keep-alive host already running as pid {}", rival.pid);
            return Ok(());
        }

        let result = self.host_loop(&signalled);
        self.bridge.reset();
        if let Err(e) = self.launcher.release_current() {
            warn!("Failed to remove host record: {e}");
        }
        result
    }

    fn host_loop(&self, signalled: &AtomicBool) -> Result<(), AppError> {
        let labels = Arc::new(DesktopEntryResolver::with_standard_dirs(&self.config.application_dirs));
        let probe = UsageWindowProbe::new(Arc::clone(&self.usage), self.config.usage_window());
        let observer = ForegroundObserver::new(probe, labels, Arc::clone(&self.bridge) as Arc<dyn SampleSink>);
        let host = KeepAliveHost::create(
            Arc::new(self.status_file()) as Arc<dyn StatusIndicator>,
            Arc::new(observer),
            self.config.poll_interval(),
        )?;
        let mode = host.on_start_command()?;
        debug!("Host start mode: {mode:?}");

        let mut polls = ATTACH_RETRY_POLLS;
        while !self.stop_requested(signalled) {
            self.bridge.reap_stopped_engine();
            if polls >= ATTACH_RETRY_POLLS {
                polls = 0;
                self.attach_engine();
            }
            polls = polls.saturating_add(1);
            thread::sleep(STOP_POLL);
        }

        info!("Stop requested, shutting down keep-alive host");
        host.on_destroy();
        Ok(())
    }

    fn stop_requested(&self, signalled: &AtomicBool) -> bool {
        if signalled.load(Ordering::Acquire) {
            info!("Termination signal received");
            return true;
        }
        self.launcher.take_stop_request()
    }

    fn attach_engine(&self) {
        if self.bridge.is_initialized() {
            return;
        }
        match self.bridge.ensure_initialized() {
            Ok(outcome) => debug!("Engine attach: {outcome:?}"),
            Err(e) => warn!("Engine attach failed: {e}"),
        }
    }

    /// One reconciler invocation, outside the scheduler.
    pub fn reconcile_once(&self, linger: Duration) -> Result<InitOutcome, AppError> {
        let result = self.reconciler().reconcile();
        self.finish_engine(linger);
        result
    }

    /// Run whatever scheduled work is due right now.
    pub fn run_due(&self, linger: Duration) -> Result<Vec<(String, WorkOutcome)>, AppError> {
        let workers: HashMap<String, Arc<dyn Worker>> =
            HashMap::from([(RECONCILE_WORK_NAME.to_string(), Arc::new(self.reconciler()) as Arc<dyn Worker>)]);
        let result = self.scheduler.run_due(unix_secs(), &workers);
        self.finish_engine(linger);
        result
    }

    /// Give a freshly started engine time to act on fire-and-forget messages, then tear it down.
    fn finish_engine(&self, linger: Duration) {
        if self.bridge.is_initialized() {
            thread::sleep(linger);
        }
        self.bridge.reset();
    }

    pub fn schedule(&self) -> Result<EnqueueOutcome, AppError> {
        DurableReconciler::schedule(&self.scheduler, self.config.reconcile_interval())
    }

    pub fn cancel(&self) -> Result<bool, AppError> {
        DurableReconciler::cancel(&self.scheduler)
    }

    pub fn register_entry(&self, program: &str, entry_point: &str) -> Result<i64, AppError> {
        self.registry.register_entry(program, entry_point)
    }

    pub fn register_callback(&self, handle: i64) -> Result<(), AppError> {
        self.bridge.register_callback(handle)
    }

    pub fn stop_host(&self) -> Result<bool, AppError> {
        self.launcher.request_stop()
    }

    pub fn status(&self) -> Result<StatusReport, AppError> {
        let host = self.launcher.running_host()?;
        // A host that was killed outright leaves its indicator file behind
        let indicator = match host {
            Some(_) => self.status_file().read()?,
            None => None,
        };
        Ok(StatusReport {
            host,
            indicator,
            callback: self.callbacks.load()?,
            work: self.scheduler.tasks()?,
            permission: self.usage.has_permission(),
        })
    }
}

/// Route SIGTERM and SIGINT into a flag the host loop polls, so both end in a clean shutdown.
fn stop_signal() -> Result<Arc<AtomicBool>, AppError> {
    let signalled = Arc::new(AtomicBool::new(false));
    for signal in [SIGTERM, SIGINT] {
        signal_hook::flag::register(signal, Arc::clone(&signalled))?;
    }
    Ok(signalled)
}
