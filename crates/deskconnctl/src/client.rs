//! Remote-call client for the deskconn agent
//!
//! Speaks the agent's line-delimited JSON frames over TCP. Ordinary calls
//! are request/response; a progressive call hands its outbound side to a
//! writer task fed by a channel and is read frame by frame by the caller.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use dc_protocol::frame::{bytes_value, value_bytes};
use dc_protocol::{CallId, RpcCodec, RpcFrame};

/// Default agent address
pub const DEFAULT_AGENT_ADDRESS: &str = "127.0.0.1:8080";

/// Error frame returned by the agent
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} ({uri})")]
pub struct RemoteError {
    pub uri: String,
    pub message: String,
}

/// One inbound frame of a progressive call
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Output chunk. Empty when the remote side has ended the session.
    Chunk(Vec<u8>),
    /// Final result; the call is over
    Final(Vec<Value>),
    /// A chunk failed; the call stays open
    Failed(RemoteError),
}

/// Client connection to the agent
pub struct RpcClient {
    address: String,
    reader: FramedRead<OwnedReadHalf, RpcCodec>,
    writer: FramedWrite<OwnedWriteHalf, RpcCodec>,
    next_call_id: CallId,
}

impl RpcClient {
    /// Connect to the agent
    pub async fn connect(address: &str) -> Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .with_context(|| format!("Failed to connect to agent at {}. Is it running?", address))?;
        let (read_half, write_half) = stream.into_split();

        tracing::debug!("Connected to agent at {}", address);

        Ok(Self {
            address: address.to_string(),
            reader: FramedRead::new(read_half, RpcCodec::new()),
            writer: FramedWrite::new(write_half, RpcCodec::new()),
            next_call_id: 1,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn allocate_call_id(&mut self) -> CallId {
        let id = self.next_call_id;
        self.next_call_id += 1;
        id
    }

    /// Invoke a procedure and wait for its final result
    pub async fn call(&mut self, procedure: &str, args: Vec<Value>) -> Result<Vec<Value>> {
        let call_id = self.allocate_call_id();
        self.writer
            .send(RpcFrame::Call {
                call_id,
                procedure: procedure.to_string(),
                args,
                progress: false,
            })
            .await
            .with_context(|| format!("Failed to send call to {}", procedure))?;

        loop {
            let frame = self
                .reader
                .next()
                .await
                .context("Agent closed the connection")?
                .context("Failed to read reply")?;

            match frame {
                RpcFrame::Result {
                    call_id: id,
                    args,
                    progress: false,
                } if id == call_id => return Ok(args),
                RpcFrame::Error {
                    call_id: id,
                    uri,
                    message,
                } if id == call_id => return Err(RemoteError { uri, message }.into()),
                other => {
                    tracing::debug!("Skipping frame for call {}", other.call_id());
                }
            }
        }
    }

    /// Open a progressive call.
    ///
    /// Each `Some(bytes)` taken from `outbound` is sent as a progress chunk
    /// in order; `None`, or the channel closing, sends the terminating frame
    /// and ends the outbound side.
    pub fn progressive(
        mut self,
        procedure: &str,
        outbound: mpsc::Receiver<Option<Vec<u8>>>,
    ) -> ProgressiveCall {
        let call_id = self.allocate_call_id();
        let writer = tokio::spawn(pump_outbound(
            self.writer,
            call_id,
            procedure.to_string(),
            outbound,
        ));

        ProgressiveCall {
            call_id,
            reader: self.reader,
            writer,
        }
    }
}

/// Inbound side of an open progressive call
pub struct ProgressiveCall {
    call_id: CallId,
    reader: FramedRead<OwnedReadHalf, RpcCodec>,
    writer: JoinHandle<Result<()>>,
}

impl ProgressiveCall {
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Next frame for this call, or `None` once the connection is closed
    pub async fn next(&mut self) -> Result<Option<Inbound>> {
        loop {
            let frame = match self.reader.next().await {
                Some(frame) => frame.context("Failed to read frame")?,
                None => return Ok(None),
            };
            if frame.call_id() != self.call_id {
                tracing::debug!("Skipping frame for call {}", frame.call_id());
                continue;
            }

            return Ok(Some(match frame {
                RpcFrame::Result {
                    args,
                    progress: true,
                    ..
                } => Inbound::Chunk(args.first().and_then(value_bytes).unwrap_or_default()),
                RpcFrame::Result { args, .. } => Inbound::Final(args),
                RpcFrame::Error { uri, message, .. } => {
                    Inbound::Failed(RemoteError { uri, message })
                }
                RpcFrame::Call { .. } => {
                    tracing::warn!("Agent sent a call frame, ignoring");
                    continue;
                }
            }));
        }
    }
}

impl Drop for ProgressiveCall {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

async fn pump_outbound(
    mut writer: FramedWrite<OwnedWriteHalf, RpcCodec>,
    call_id: CallId,
    procedure: String,
    mut outbound: mpsc::Receiver<Option<Vec<u8>>>,
) -> Result<()> {
    while let Some(Some(chunk)) = outbound.recv().await {
        writer
            .send(RpcFrame::Call {
                call_id,
                procedure: procedure.clone(),
                args: vec![bytes_value(&chunk)],
                progress: true,
            })
            .await
            .context("Failed to send chunk")?;
    }

    tracing::debug!(call_id, "Local input ended, closing call");
    writer
        .send(RpcFrame::Call {
            call_id,
            procedure,
            args: Vec::new(),
            progress: false,
        })
        .await
        .context("Failed to send terminating frame")?;
    Ok(())
}
