use super::{read_json, write_json_atomic};
use crate::error::AppError;
use crate::unix_millis;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use sysinfo::{Pid, ProcessRefreshKind, System};

const RECORD_FILE: &str = "host.json";
const STOP_FILE: &str = "host.stop";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    AlreadyRunning { pid: u32 },
    Started { pid: u32 },
}

/// Starts and stops the keep-alive host. Both operations are idempotent.
pub trait HostLauncher: Send + Sync {
    fn ensure_running(&self) -> Result<LaunchOutcome, AppError>;

    /// Ask a running host to shut down. Returns false when none was running.
    fn request_stop(&self) -> Result<bool, AppError>;
}

/// Identifies a host process. The start time guards against pid reuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    pub pid: u32,
    pub process_started_at: Option<u64>,
    pub recorded_at: i64,
}

impl HostRecord {
    fn for_pid(pid: u32) -> Self {
        Self {
            pid,
            process_started_at: process_start_time(pid),
            recorded_at: unix_millis(),
        }
    }

    fn is_alive(&self) -> bool {
        let pid = Pid::from_u32(self.pid);
        let mut sys = System::new();
        if !sys.refresh_process_specifics(pid, ProcessRefreshKind::new()) {
            return false;
        }
        match (sys.process(pid), self.process_started_at) {
            (Some(process), Some(started_at)) => process.start_time() == started_at,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

fn process_start_time(pid: u32) -> Option<u64> {
    let mut sys = System::new();
    let sys_pid = Pid::from_u32(pid);
    sys.refresh_process_specifics(sys_pid, ProcessRefreshKind::new());
    sys.process(sys_pid).map(sysinfo::Process::start_time)
}

/// Runs the host as a detached `snooper host` process tracked through a pid record
/// in the data dir. Stopping is cooperative: the host polls for a stop request file.
pub struct ProcessHostLauncher {
    data_dir: PathBuf,
    exe: PathBuf,
    host_args: Vec<OsString>,
}

impl ProcessHostLauncher {
    pub fn new(data_dir: PathBuf, exe: PathBuf, host_args: Vec<OsString>) -> Self {
        Self {
            data_dir,
            exe,
            host_args,
        }
    }

    fn record_path(&self) -> PathBuf {
        self.data_dir.join(RECORD_FILE)
    }

    fn stop_path(&self) -> PathBuf {
        self.data_dir.join(STOP_FILE)
    }

    /// The live host, if any. A record left behind by a dead host is removed.
    pub fn running_host(&self) -> Result<Option<HostRecord>, AppError> {
        let Some(record) = read_json::<HostRecord>(&self.record_path())? else {
            return Ok(None);
        };
        if record.is_alive() {
            return Ok(Some(record));
        }
        debug!("Removing stale host record for pid {}", record.pid);
        remove_if_exists(&self.record_path())?;
        Ok(None)
    }

    /// Record the calling process as the host. Returns the rival instead if another
    /// live host already holds the record.
    pub fn register_current(&self) -> Result<Option<HostRecord>, AppError> {
        let pid = std::process::id();
        if let Some(existing) = self.running_host()? {
            if existing.pid != pid {
                return Ok(Some(existing));
            }
        }
        remove_if_exists(&self.stop_path())?;
        write_json_atomic(&self.record_path(), &HostRecord::for_pid(pid))?;
        Ok(None)
    }

    /// Consume a pending stop request.
    pub fn take_stop_request(&self) -> bool {
        match fs::remove_file(self.stop_path()) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Failed to consume stop request: {e}");
                true
            }
        }
    }

    /// Drop the record if it still names the calling process.
    pub fn release_current(&self) -> Result<(), AppError> {
        let record = read_json::<HostRecord>(&self.record_path())?;
        if record.is_some_and(|r| r.pid == std::process::id()) {
            remove_if_exists(&self.record_path())?;
        }
        Ok(())
    }
}

impl HostLauncher for ProcessHostLauncher {
    fn ensure_running(&self) -> Result<LaunchOutcome, AppError> {
        if let Some(record) = self.running_host()? {
            debug!("Keep-alive host already running as pid {}", record.pid);
            return Ok(LaunchOutcome::AlreadyRunning { pid: record.pid });
        }

        remove_if_exists(&self.stop_path())?;
        let mut child = Command::new(&self.exe)
            .args(&self.host_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let pid = child.id();
        write_json_atomic(&self.record_path(), &HostRecord::for_pid(pid))?;

        // Reap the child if it exits while we are still around
        thread::Builder::new()
            .name("host-reaper".into())
            .spawn(move || {
                let _ = child.wait();
            })?;

        info!("Started keep-alive host as pid {pid}");
        Ok(LaunchOutcome::Started { pid })
    }

    fn request_stop(&self) -> Result<bool, AppError> {
        let Some(record) = self.running_host()? else {
            return Ok(false);
        };
        fs::write(self.stop_path(), record.pid.to_string())?;
        info!("Requested keep-alive host (pid {}) to stop", record.pid);
        Ok(true)
    }
}

fn remove_if_exists(path: &Path) -> Result<(), AppError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
