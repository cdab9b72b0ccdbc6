//! Remote-call frames
//!
//! Every frame is one JSON object on its own line. A call is identified by
//! the `call_id` chosen by the client; the agent pairs it with the
//! connection it arrived on to form the caller identifier.
//!
//! Progressive calls exchange any number of `progress: true` frames in
//! both directions. The client ends its side with a `progress: false`
//! call frame; the agent ends the call with a final `result` or an `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum length of a single frame line (1 MiB)
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Client-chosen call identifier, unique within one connection
pub type CallId = u64;

/// A single remote-call frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RpcFrame {
    /// Invoke a procedure, or continue/terminate a progressive call
    Call {
        call_id: CallId,
        procedure: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        progress: bool,
    },

    /// Result chunk (`progress: true`) or final result
    Result {
        call_id: CallId,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        progress: bool,
    },

    /// Call failed. Ends an ordinary call; on a progressive call it reports
    /// the failed chunk and the call stays open until the client ends it.
    Error {
        call_id: CallId,
        uri: String,
        message: String,
    },
}

impl RpcFrame {
    /// The call this frame belongs to
    pub fn call_id(&self) -> CallId {
        match self {
            RpcFrame::Call { call_id, .. }
            | RpcFrame::Result { call_id, .. }
            | RpcFrame::Error { call_id, .. } => *call_id,
        }
    }

    /// Intermediate result chunk carrying raw bytes, or the empty
    /// end-of-stream chunk when `data` is `None`
    pub fn progress_chunk(call_id: CallId, data: Option<&[u8]>) -> Self {
        RpcFrame::Result {
            call_id,
            args: data.map(|d| vec![bytes_value(d)]).unwrap_or_default(),
            progress: true,
        }
    }

    /// Final result
    pub fn final_result(call_id: CallId, args: Vec<Value>) -> Self {
        RpcFrame::Result {
            call_id,
            args,
            progress: false,
        }
    }
}

/// Encode raw bytes as a frame argument
pub fn bytes_value(data: &[u8]) -> Value {
    Value::Array(data.iter().map(|b| Value::from(*b)).collect())
}

/// Decode a frame argument as raw bytes.
///
/// Accepts either an array of byte values or a string (its UTF-8 bytes).
/// Returns `None` for anything else, including out-of-range numbers.
pub fn value_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => Some(s.as_bytes().to_vec()),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
            .collect(),
        _ => None,
    }
}

/// Positional argument as a string
pub fn arg_str(args: &[Value], index: usize) -> Option<&str> {
    args.get(index).and_then(Value::as_str)
}
