//! Procedure routing
//!
//! Device-control procedures would be registered here alongside the shell
//! and pairing ones.

use std::sync::Arc;

use serde_json::{json, Value};

use dc_core::error::{PairingError, ShellError};
use dc_core::ErrorKind;
use dc_core::{CallerId, OutputSink};
use dc_protocol::frame::{arg_str, value_bytes};
use dc_protocol::procedures::{
    self, ERROR_INVALID_ARGUMENT, ERROR_NO_SUCH_PROCEDURE,
};
use dc_protocol::{CallId, RpcFrame};

use crate::state::AgentState;

/// Label recorded for devices that do not send one
pub const DEFAULT_DEVICE_LABEL: &str = "Mobile Device";

/// One inbound call frame, tagged with its caller
#[derive(Debug, Clone)]
pub struct Invocation {
    pub caller: CallerId,
    pub procedure: String,
    pub args: Vec<Value>,
    pub progress: bool,
}

/// What a handler sends back
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Final result
    Result(Vec<Value>),
    /// Failure with an error URI
    Error { uri: String, message: String },
    /// Nothing to send for this frame
    NoResult,
}

impl Reply {
    pub fn error(uri: &str, message: impl Into<String>) -> Self {
        Reply::Error {
            uri: uri.to_string(),
            message: message.into(),
        }
    }

    pub fn into_frame(self, call_id: CallId) -> Option<RpcFrame> {
        match self {
            Reply::Result(args) => Some(RpcFrame::final_result(call_id, args)),
            Reply::Error { uri, message } => Some(RpcFrame::Error {
                call_id,
                uri,
                message,
            }),
            Reply::NoResult => None,
        }
    }
}

impl From<ShellError> for Reply {
    fn from(e: ShellError) -> Self {
        Reply::error(e.kind().uri(), e.to_string())
    }
}

/// Routes invocations to the agent's handlers
pub struct Router {
    state: Arc<AgentState>,
}

impl Router {
    pub fn new(state: Arc<AgentState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<AgentState> {
        &self.state
    }

    /// Whether calls to `procedure` stay open across frames. Open calls get
    /// a terminating invocation when their connection drops.
    pub fn is_progressive(&self, procedure: &str) -> bool {
        procedure == procedures::SHELL
    }

    pub async fn handle(&self, invocation: Invocation, sink: Arc<dyn OutputSink>) -> Reply {
        match invocation.procedure.as_str() {
            procedures::SHELL => self.shell(invocation, sink).await,
            procedures::START_PAIRING => self.start_pairing().await,
            procedures::PAIR => self.pair(&invocation.args).await,
            procedures::EXCHANGE_KEYS => self.exchange_keys(&invocation.args).await,
            other => {
                tracing::debug!(caller = %invocation.caller, "No such procedure: {}", other);
                Reply::error(
                    ERROR_NO_SUCH_PROCEDURE,
                    format!("no such procedure: {}", other),
                )
            }
        }
    }

    async fn shell(&self, invocation: Invocation, sink: Arc<dyn OutputSink>) -> Reply {
        let Invocation {
            caller,
            args,
            progress,
            ..
        } = invocation;

        let chunk = match args.first() {
            None => Vec::new(),
            Some(value) => match value_bytes(value) {
                Some(bytes) => bytes,
                None if progress => {
                    return ShellError::InvalidPayload("expected bytes".to_string()).into()
                }
                None => Vec::new(),
            },
        };

        match self.state.shells.dispatch(caller, &chunk, progress, sink).await {
            Ok(()) if progress => Reply::NoResult,
            Ok(()) => Reply::Result(Vec::new()),
            Err(e) => {
                tracing::warn!(caller = %caller, "Shell chunk failed: {}", e);
                e.into()
            }
        }
    }

    async fn start_pairing(&self) -> Reply {
        let code = self.state.pairing.start_pairing().await;
        Reply::Result(vec![json!(code)])
    }

    async fn pair(&self, args: &[Value]) -> Reply {
        let device_id = arg_str(args, 0).unwrap_or_default();
        let code = arg_str(args, 1).unwrap_or_default();
        let label = match args.get(2) {
            Some(_) => arg_str(args, 2).unwrap_or_default(),
            None => DEFAULT_DEVICE_LABEL,
        };

        outcome(
            self.state
                .pairing
                .validate_claim(device_id, code, label)
                .await,
        )
    }

    async fn exchange_keys(&self, args: &[Value]) -> Reply {
        if args.len() < 3 {
            return Reply::Result(vec![json!(false), json!("missing arguments")]);
        }

        let session_id = arg_str(args, 0).unwrap_or_default();
        let device_id = arg_str(args, 1).unwrap_or_default();
        let device_key = arg_str(args, 2).unwrap_or_default();

        outcome(
            self.state
                .pairing
                .exchange_keys(session_id, device_id, device_key)
                .await,
        )
    }
}

/// `[true, value]` or `[false, reason]`
fn outcome(result: Result<String, PairingError>) -> Reply {
    match result {
        Ok(value) => Reply::Result(vec![json!(true), json!(value)]),
        Err(e) => {
            match e.kind() {
                ErrorKind::OperationFailed => tracing::warn!("Pairing request failed: {}", e),
                _ => tracing::info!("Pairing request rejected: {}", e),
            }
            Reply::Result(vec![json!(false), json!(e.to_string())])
        }
    }
}
