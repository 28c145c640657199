//! Wire format between native code and the consumer engine.
//!
//! Each frame is a 4-byte little-endian length followed by a JSON [`Envelope`].

use crate::constants::MAX_FRAME_SIZE;
use crate::error::AppError;
use crate::models::ForegroundSample;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{self, Read, Write};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: &str, arguments: Value) -> Self {
        Self {
            method: method.to_string(),
            arguments,
        }
    }
}

/// The three ways a call can be answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Success {
        #[serde(default)]
        result: Value,
    },
    Error {
        code: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        details: Value,
    },
    NotImplemented,
}

impl Reply {
    pub fn success(result: Value) -> Self {
        Reply::Success { result }
    }

    pub fn error(code: &str, message: &str) -> Self {
        Reply::Error {
            code: code.to_string(),
            message: Some(message.to_string()),
            details: Value::Null,
        }
    }
}

impl From<AppError> for Reply {
    fn from(e: AppError) -> Self {
        Reply::error(e.code(), &e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    Call {
        channel: String,
        id: u64,
        method: String,
        #[serde(default)]
        arguments: Value,
    },
    Reply {
        channel: String,
        id: u64,
        reply: Reply,
    },
}

/// Native -> engine messages.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCall {
    OnForegroundAppDetected(ForegroundSample),
    CheckStatusNow,
}

impl NativeCall {
    pub fn method(&self) -> &'static str {
        match self {
            NativeCall::OnForegroundAppDetected(_) => "onForegroundAppDetected",
            NativeCall::CheckStatusNow => "checkStatusNow",
        }
    }

    /// Samples are fire-and-forget; only the status check asks for an answer.
    pub fn expects_reply(&self) -> bool {
        match self {
            NativeCall::OnForegroundAppDetected(_) => false,
            NativeCall::CheckStatusNow => true,
        }
    }

    pub fn into_method_call(self) -> Result<MethodCall, AppError> {
        let method = self.method();
        let arguments = match self {
            NativeCall::OnForegroundAppDetected(sample) => serde_json::to_value(sample)?,
            NativeCall::CheckStatusNow => Value::Null,
        };
        Ok(MethodCall::new(method, arguments))
    }
}

/// Engine -> native requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    StartKeepAliveHost,
    StopKeepAliveHost,
    RegisterCallback { handle: i64 },
    CheckPermission,
    RequestPermission,
}

impl EngineCall {
    /// Decode a call. `Ok(None)` for methods this side does not implement.
    pub fn parse(call: &MethodCall) -> Result<Option<Self>, AppError> {
        let parsed = match call.method.as_str() {
            "startKeepAliveHost" => Self::StartKeepAliveHost,
            "stopKeepAliveHost" => Self::StopKeepAliveHost,
            "registerCallback" => Self::RegisterCallback {
                handle: parse_handle(&call.arguments)?,
            },
            "checkPermission" => Self::CheckPermission,
            "requestPermission" => Self::RequestPermission,
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }

    pub fn to_method_call(&self) -> MethodCall {
        match self {
            Self::StartKeepAliveHost => MethodCall::new("startKeepAliveHost", Value::Null),
            Self::StopKeepAliveHost => MethodCall::new("stopKeepAliveHost", Value::Null),
            Self::RegisterCallback { handle } => MethodCall::new("registerCallback", json!({ "handle": handle })),
            Self::CheckPermission => MethodCall::new("checkPermission", Value::Null),
            Self::RequestPermission => MethodCall::new("requestPermission", Value::Null),
        }
    }
}

fn parse_handle(arguments: &Value) -> Result<i64, AppError> {
    let invalid = |reason: &str| AppError::InvalidArgument {
        field: "handle",
        reason: reason.into(),
    };

    let value = arguments.get("handle").ok_or_else(|| invalid("is required"))?;
    let handle = value.as_i64().ok_or_else(|| invalid("must be a 64-bit integer"))?;
    if handle == 0 {
        return Err(invalid("must be non-zero"));
    }
    Ok(handle)
}

pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Envelope> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = usize::try_from(u32::from_le_bytes(len_bytes))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Message too large: {len} bytes (max: {MAX_FRAME_SIZE} bytes)"),
        ));
    }

    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer)?;

    serde_json::from_slice(&buffer).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub fn write_frame<W: Write>(writer: &mut W, envelope: &Envelope) -> io::Result<()> {
    let json = serde_json::to_vec(envelope)?;
    if json.len() > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes (max: {MAX_FRAME_SIZE} bytes)", json.len()),
        ));
    }
    let len = u32::try_from(json.len()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&json)?;
    writer.flush()
}
