use super::codec::{MethodCall, Reply};
use crate::error::AppError;
use crate::models::CallbackInfo;
use log::debug;
use std::sync::Arc;

pub type ReplyHandler = Box<dyn FnOnce(Reply) + Send + 'static>;
pub type CallHandler = Arc<dyn Fn(MethodCall) -> Reply + Send + Sync + 'static>;

/// Message transport exposed by a running engine.
pub trait MessageTransport: Send + Sync {
    /// Send a call; `reply`, if given, runs once the engine answers.
    fn send(&self, channel: &str, call: MethodCall, reply: Option<ReplyHandler>) -> Result<(), AppError>;

    /// Install (or remove) the handler for calls the engine makes on `channel`.
    fn set_call_handler(&self, channel: &str, handler: Option<CallHandler>);
}

/// A consumer engine instance. Dropping it tears the engine down.
pub trait Engine: Send {
    /// Start the engine at `entry`, passing `handle` as the entry point's only argument.
    fn execute_callback(&self, entry: &CallbackInfo, handle: i64) -> Result<(), AppError>;

    fn transport(&self) -> Arc<dyn MessageTransport>;

    /// False once the engine has gone away on its own and must be rebuilt.
    fn is_running(&self) -> bool;
}

pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Engine>, AppError>;
}

/// Resolves a persisted handle to its entry point. `Ok(None)` means the handle is stale.
pub trait CallbackLookup: Send + Sync {
    fn lookup(&self, handle: i64) -> Result<Option<CallbackInfo>, AppError>;
}

/// A named channel over an engine's transport.
pub struct MethodChannel {
    name: String,
    transport: Arc<dyn MessageTransport>,
}

impl MethodChannel {
    pub fn new(transport: Arc<dyn MessageTransport>, name: &str) -> Self {
        Self {
            name: name.to_string(),
            transport,
        }
    }

    pub fn invoke(&self, call: MethodCall, reply: Option<ReplyHandler>) -> Result<(), AppError> {
        debug!("-> {} {}", self.name, call.method);
        self.transport.send(&self.name, call, reply)
    }

    pub fn set_method_call_handler(&self, handler: Option<CallHandler>) {
        self.transport.set_call_handler(&self.name, handler);
    }
}
