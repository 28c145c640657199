//! Bridge between native components and the consumer engine.
//!
//! The bridge persists the callback reference, lazily rebuilds the engine from
//! it (at most once per process) and relays messages both ways. All engine
//! work happens on the bridge's [`DispatchQueue`]; background threads only
//! post onto it.

pub mod callback;
pub mod codec;
pub mod dispatch;
pub mod engine;
pub mod latch;
pub mod native_api;
pub mod process_engine;

pub use callback::{CallbackRegistry, CallbackStore};
pub use codec::{EngineCall, MethodCall, NativeCall, Reply};
pub use dispatch::DispatchQueue;
pub use engine::{CallHandler, CallbackLookup, Engine, EngineFactory, MessageTransport, MethodChannel, ReplyHandler};
pub use latch::{Claim, InitLatch};
pub use native_api::NativeApi;
pub use process_engine::ProcessEngineFactory;

use crate::constants::{BACKGROUND_CHANNEL, NATIVE_CHANNEL};
use crate::error::AppError;
use crate::models::ForegroundSample;
use crate::safe_lock;
use crate::tracker::SampleSink;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};

/// Result of an initialization attempt. Only storage or engine failures are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Constructed,
    AlreadyInitialized,
    /// Construction is in flight and the caller is on the dispatch queue, where
    /// waiting for it would deadlock.
    InProgress,
    /// No callback has been registered yet.
    NoCallback,
    /// The stored handle no longer resolves to an entry point.
    StaleCallback,
}

#[derive(Default)]
struct BridgeState {
    engine: Option<Box<dyn Engine>>,
    channel: Option<Arc<MethodChannel>>,
}

pub struct CrossBoundaryBridge {
    store: CallbackStore,
    lookup: Arc<dyn CallbackLookup>,
    factory: Arc<dyn EngineFactory>,
    queue: Arc<DispatchQueue>,
    latch: InitLatch,
    state: Arc<Mutex<BridgeState>>,
    native_handler: Option<CallHandler>,
}

impl CrossBoundaryBridge {
    pub fn new(
        store: CallbackStore,
        lookup: Arc<dyn CallbackLookup>,
        factory: Arc<dyn EngineFactory>,
        queue: Arc<DispatchQueue>,
    ) -> Self {
        Self {
            store,
            lookup,
            factory,
            queue,
            latch: InitLatch::new(),
            state: Arc::new(Mutex::new(BridgeState::default())),
            native_handler: None,
        }
    }

    /// Answer engine -> native calls with `handler` once an engine is up.
    pub fn with_native_handler(mut self, handler: CallHandler) -> Self {
        self.native_handler = Some(handler);
        self
    }

    /// Persist `handle`, whether or not an engine is live.
    pub fn register_callback(&self, handle: i64) -> Result<(), AppError> {
        self.store.register(handle)?;
        info!("Registered callback handle {handle}");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.latch.is_initialized()
    }

    /// Build the engine from the stored callback unless that already happened.
    ///
    /// A caller that loses the race waits for the winner, so it returns with the
    /// engine up (or with the latch reopened after the winner gave up).
    pub fn ensure_initialized(&self) -> Result<InitOutcome, AppError> {
        let claim = if self.queue.is_current() {
            self.latch.try_claim()
        } else {
            self.latch.claim()
        };
        let guard = match claim {
            Claim::Acquired(guard) => guard,
            Claim::AlreadyInitialized => return Ok(InitOutcome::AlreadyInitialized),
            Claim::InProgress => return Ok(InitOutcome::InProgress),
        };

        let Some(reference) = self.store.load()? else {
            debug!("No callback handle saved, can't initialize");
            return Ok(InitOutcome::NoCallback);
        };

        let Some(entry) = self.lookup.lookup(reference.handle)? else {
            warn!("Callback handle {} does not resolve; waiting for a new registration", reference.handle);
            return Ok(InitOutcome::StaleCallback);
        };

        let factory = Arc::clone(&self.factory);
        let state = Arc::clone(&self.state);
        let native_handler = self.native_handler.clone();
        let handle = reference.handle;

        self.queue.run_sync(move || -> Result<(), AppError> {
            let engine = factory.create()?;
            engine.execute_callback(&entry, handle)?;

            let transport = engine.transport();
            let channel = Arc::new(MethodChannel::new(Arc::clone(&transport), BACKGROUND_CHANNEL));
            if let Some(handler) = native_handler {
                MethodChannel::new(transport, NATIVE_CHANNEL).set_method_call_handler(Some(handler));
            }

            let mut state = safe_lock(&state, "Bridge state");
            state.engine = Some(engine);
            state.channel = Some(channel);
            Ok(())
        })??;

        guard.commit();
        info!("Background engine started for callback handle {handle}");
        Ok(InitOutcome::Constructed)
    }

    /// Initialize if needed, then fire a status check at the engine.
    pub fn resync_now(&self) -> Result<InitOutcome, AppError> {
        let outcome = self.ensure_initialized()?;
        if self.send(NativeCall::CheckStatusNow) {
            debug!("Status check posted ({outcome:?})");
        }
        Ok(outcome)
    }

    /// Relay a sample to the engine, or drop it if no channel is open.
    pub fn deliver(&self, sample: ForegroundSample) {
        let identifier = sample.identifier.clone();
        if !self.send(NativeCall::OnForegroundAppDetected(sample)) {
            debug!("No engine channel; dropped sample for {identifier}");
        }
    }

    /// Tear the engine down if it stopped on its own, so the next
    /// [`ensure_initialized`](Self::ensure_initialized) rebuilds it. Returns true if it did.
    pub fn reap_stopped_engine(&self) -> bool {
        if !self.latch.is_initialized() {
            return false;
        }

        let state = Arc::clone(&self.state);
        let stopped = self
            .queue
            .run_sync(move || {
                safe_lock(&state, "Bridge state")
                    .engine
                    .as_ref()
                    .is_some_and(|engine| !engine.is_running())
            })
            .unwrap_or(false);
        if stopped {
            warn!("Background engine stopped; it will be rebuilt on the next attach");
            self.reset();
        }
        stopped
    }

    /// Tear down the engine and reopen the latch.
    pub fn reset(&self) {
        let state = Arc::clone(&self.state);
        let teardown = move || {
            let mut state = safe_lock(&state, "Bridge state");
            state.channel = None;
            state.engine = None;
        };
        if let Err(e) = self.queue.run_sync(teardown) {
            warn!("Engine teardown did not complete: {e}");
        }
        self.latch.reset();
    }

    /// Post `call` onto the queue. Returns false when no channel is open.
    fn send(&self, call: NativeCall) -> bool {
        let Some(channel) = self.channel() else {
            return false;
        };

        self.queue.post(move || {
            let method = call.method();
            let reply = call.expects_reply().then(|| log_reply(method));
            let result = call.into_method_call().and_then(|call| channel.invoke(call, reply));
            if let Err(e) = result {
                warn!("Error sending {method} to engine: {e}");
            }
        })
    }

    fn channel(&self) -> Option<Arc<MethodChannel>> {
        safe_lock(&self.state, "Bridge state").channel.clone()
    }
}

/// Replies are accepted whatever they say; they are only logged.
fn log_reply(method: &'static str) -> ReplyHandler {
    Box::new(move |reply: Reply| match reply {
        Reply::Success { .. } => debug!("{method} acknowledged"),
        Reply::Error { code, message, .. } => {
            debug!("{method} answered with error {code}: {}", message.unwrap_or_default());
        }
        Reply::NotImplemented => debug!("{method} not implemented by engine"),
    })
}

impl SampleSink for CrossBoundaryBridge {
    fn deliver(&self, sample: ForegroundSample) {
        CrossBoundaryBridge::deliver(self, sample);
    }
}
