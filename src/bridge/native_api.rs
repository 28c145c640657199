use super::callback::CallbackStore;
use super::codec::{EngineCall, MethodCall, Reply};
use super::engine::CallHandler;
use crate::host::HostLauncher;
use crate::platform::UsageService;
use log::{info, warn};
use serde_json::Value;
use std::sync::Arc;

/// Answers the calls the engine makes into native code.
#[derive(Clone)]
pub struct NativeApi {
    launcher: Arc<dyn HostLauncher>,
    usage: Arc<dyn UsageService>,
    callbacks: CallbackStore,
}

impl NativeApi {
    pub fn new(launcher: Arc<dyn HostLauncher>, usage: Arc<dyn UsageService>, callbacks: CallbackStore) -> Self {
        Self {
            launcher,
            usage,
            callbacks,
        }
    }

    pub fn into_handler(self) -> CallHandler {
        Arc::new(move |call: MethodCall| self.handle(&call))
    }

    pub fn handle(&self, call: &MethodCall) -> Reply {
        let request = match EngineCall::parse(call) {
            Ok(Some(request)) => request,
            Ok(None) => return Reply::NotImplemented,
            Err(e) => {
                warn!("Rejected {} from engine: {e}", call.method);
                return e.into();
            }
        };

        match request {
            EngineCall::StartKeepAliveHost => match self.launcher.ensure_running() {
                Ok(outcome) => {
                    info!("Keep-alive host start requested by engine: {outcome:?}");
                    Reply::success(Value::Bool(true))
                }
                Err(e) => e.into(),
            },
            EngineCall::StopKeepAliveHost => match self.launcher.request_stop() {
                Ok(was_running) => Reply::success(Value::Bool(was_running)),
                Err(e) => e.into(),
            },
            EngineCall::RegisterCallback { handle } => match self.callbacks.register(handle) {
                Ok(()) => Reply::success(Value::Bool(true)),
                Err(e) => e.into(),
            },
            EngineCall::CheckPermission => Reply::success(Value::Bool(self.usage.has_permission())),
            EngineCall::RequestPermission => {
                self.usage.request_permission();
                Reply::success(Value::Null)
            }
        }
    }
}
