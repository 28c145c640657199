//! Consumer engine hosted in a child process.
//!
//! The child is started as `<program> <handle>` with the entry point name in
//! `SNOOPER_ENTRY_POINT`, and talks to us over stdin/stdout using the framed
//! envelopes from [`super::codec`]. Calls the child makes are answered on the
//! dispatch queue; replies to our calls are matched by id.
//!
//! Writes go through a bounded outbox drained by a writer thread, so a child
//! that stops reading never blocks the dispatch queue: once the outbox is
//! full, further messages are dropped.

use super::codec::{read_frame, write_frame, Envelope, MethodCall, Reply};
use super::dispatch::DispatchQueue;
use super::engine::{CallHandler, Engine, EngineFactory, MessageTransport, ReplyHandler};
use crate::constants::ENTRY_POINT_ENV;
use crate::error::AppError;
use crate::models::CallbackInfo;
use crate::safe_lock;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// How long a child gets to exit on its own after its stdin closes.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Frames waiting for the writer thread.
const OUTBOX_CAPACITY: usize = 32;

/// Reply handlers kept for an engine that is slow to answer; the oldest go first.
const MAX_PENDING_REPLIES: usize = 64;

pub struct ProcessEngineFactory {
    queue: Arc<DispatchQueue>,
}

impl ProcessEngineFactory {
    pub fn new(queue: Arc<DispatchQueue>) -> Self {
        Self { queue }
    }
}

impl EngineFactory for ProcessEngineFactory {
    fn create(&self) -> Result<Box<dyn Engine>, AppError> {
        Ok(Box::new(ProcessEngine {
            link: Arc::new(ProcessLink::new(Arc::clone(&self.queue))),
            child: Mutex::new(None),
        }))
    }
}

pub struct ProcessEngine {
    link: Arc<ProcessLink>,
    child: Mutex<Option<Child>>,
}

impl Engine for ProcessEngine {
    fn execute_callback(&self, entry: &CallbackInfo, handle: i64) -> Result<(), AppError> {
        let mut slot = safe_lock(&self.child, "Engine child");
        if slot.is_some() {
            return Err(AppError::Engine("engine is already running".into()));
        }

        let mut child = Command::new(&entry.program)
            .arg(handle.to_string())
            .env(ENTRY_POINT_ENV, &entry.entry_point)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| AppError::Engine(format!("failed to start {}: {e}", entry.program)))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(AppError::Engine("engine stdio was not captured".into()));
        };

        if let Err(e) = self.link.attach(stdin) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AppError::Io(e));
        }
        let link = Arc::clone(&self.link);
        thread::Builder::new()
            .name("engine-reader".into())
            .spawn(move || link.read_loop(stdout))?;

        info!(
            "Started engine {} (pid {}) at entry point '{}'",
            entry.program,
            child.id(),
            entry.entry_point
        );
        *slot = Some(child);
        Ok(())
    }

    fn transport(&self) -> Arc<dyn MessageTransport> {
        Arc::clone(&self.link) as Arc<dyn MessageTransport>
    }

    fn is_running(&self) -> bool {
        !self.link.is_closed()
    }
}

impl Drop for ProcessEngine {
    fn drop(&mut self) {
        self.link.detach();
        let Some(mut child) = safe_lock(&self.child, "Engine child").take() else {
            return;
        };

        let deadline = Instant::now() + EXIT_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Engine exited with {status}");
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                Ok(None) | Err(_) => break,
            }
        }

        warn!("Engine did not exit after its input closed; killing it");
        if let Err(e) = child.kill() {
            warn!("Failed to kill engine: {e}");
        }
        let _ = child.wait();
    }
}

/// Shared between the engine, the reader thread and the channels.
struct ProcessLink {
    queue: Arc<DispatchQueue>,
    outbox: Mutex<Option<SyncSender<Envelope>>>,
    pending: Mutex<BTreeMap<u64, ReplyHandler>>,
    handlers: Mutex<HashMap<String, CallHandler>>,
    next_id: AtomicU64,
    /// Set once either direction of the pipe has failed.
    closed: AtomicBool,
}

impl ProcessLink {
    fn new(queue: Arc<DispatchQueue>) -> Self {
        Self {
            queue,
            outbox: Mutex::new(None),
            pending: Mutex::new(BTreeMap::new()),
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Start the writer thread feeding `input`.
    fn attach<W: Write + Send + 'static>(self: &Arc<Self>, input: W) -> io::Result<()> {
        let (sender, receiver) = mpsc::sync_channel::<Envelope>(OUTBOX_CAPACITY);
        let link = Arc::clone(self);
        thread::Builder::new().name("engine-writer".into()).spawn(move || {
            let mut writer = BufWriter::new(input);
            // Ends when the outbox is dropped; dropping the writer closes the child's input
            for envelope in receiver {
                if let Err(e) = write_frame(&mut writer, &envelope) {
                    warn!("Engine stopped accepting input: {e}");
                    link.close();
                    break;
                }
            }
        })?;
        *safe_lock(&self.outbox, "Engine outbox") = Some(sender);
        Ok(())
    }

    /// Close the child's input; outstanding replies will never arrive.
    fn detach(&self) {
        safe_lock(&self.outbox, "Engine outbox").take();
        safe_lock(&self.pending, "Engine pending replies").clear();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        safe_lock(&self.pending, "Engine pending replies").clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue `envelope` for the writer thread without blocking.
    fn write(&self, envelope: Envelope) -> Result<(), AppError> {
        if self.is_closed() {
            return Err(AppError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "engine has exited")));
        }
        let outbox = safe_lock(&self.outbox, "Engine outbox");
        let Some(sender) = outbox.as_ref() else {
            return Err(AppError::Io(io::Error::new(io::ErrorKind::NotConnected, "engine is not running")));
        };
        match sender.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Err(AppError::Engine("engine is not reading its input; message dropped".into()))
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(AppError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "engine writer has stopped")))
            }
        }
    }

    fn track_reply(&self, id: u64, reply: ReplyHandler) {
        let mut pending = safe_lock(&self.pending, "Engine pending replies");
        while pending.len() >= MAX_PENDING_REPLIES {
            let Some((oldest, _)) = pending.pop_first() else {
                break;
            };
            debug!("Giving up on reply {oldest}");
        }
        pending.insert(id, reply);
    }

    fn read_loop<R: Read>(self: Arc<Self>, stdout: R) {
        let mut reader = BufReader::new(stdout);
        loop {
            match read_frame(&mut reader) {
                Ok(envelope) => self.dispatch(envelope),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!("Engine closed its output");
                    break;
                }
                Err(e) => {
                    warn!("Engine stream error: {e}");
                    break;
                }
            }
        }
        self.close();
    }

    fn dispatch(self: &Arc<Self>, envelope: Envelope) {
        match envelope {
            Envelope::Reply { id, reply, .. } => {
                let handler = safe_lock(&self.pending, "Engine pending replies").remove(&id);
                match handler {
                    Some(handler) => {
                        self.queue.post(move || handler(reply));
                    }
                    None => debug!("Dropping reply {id} with no waiting caller"),
                }
            }
            Envelope::Call {
                channel,
                id,
                method,
                arguments,
            } => {
                let handler = safe_lock(&self.handlers, "Engine call handlers").get(&channel).cloned();
                let link = Arc::clone(self);
                self.queue.post(move || {
                    let reply = match handler {
                        Some(handler) => handler(MethodCall { method, arguments }),
                        None => Reply::NotImplemented,
                    };
                    if let Err(e) = link.write(Envelope::Reply { channel, id, reply }) {
                        warn!("Failed to answer engine call {id}: {e}");
                    }
                });
            }
        }
    }
}

impl MessageTransport for ProcessLink {
    fn send(&self, channel: &str, call: MethodCall, reply: Option<ReplyHandler>) -> Result<(), AppError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Some(reply) = reply {
            self.track_reply(id, reply);
        }

        let envelope = Envelope::Call {
            channel: channel.to_string(),
            id,
            method: call.method,
            arguments: call.arguments,
        };
        self.write(envelope).map_err(|e| {
            safe_lock(&self.pending, "Engine pending replies").remove(&id);
            e
        })
    }

    fn set_call_handler(&self, channel: &str, handler: Option<CallHandler>) {
        let mut handlers = safe_lock(&self.handlers, "Engine call handlers");
        match handler {
            Some(handler) => {
                handlers.insert(channel.to_string(), handler);
            }
            None => {
                handlers.remove(channel);
            }
        }
    }
}
