//! Remote-call server
//!
//! Accepts TCP connections carrying line-delimited JSON frames. Frames on a
//! connection are handled one at a time in arrival order; replies and
//! progress chunks leave through a single writer task per connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use dc_core::{CallerId, OutputSink, SinkClosed};
use dc_protocol::{CallId, RpcCodec, RpcFrame};

use super::router::{Invocation, Router};

/// Outbound frames buffered per connection before producers wait
const OUTBOUND_QUEUE: usize = 256;

/// Streams one progressive call's output back to its connection
struct CallSink {
    call_id: CallId,
    tx: mpsc::Sender<RpcFrame>,
}

impl OutputSink for CallSink {
    fn send(&self, chunk: Option<&[u8]>) -> Result<(), SinkClosed> {
        self.tx
            .blocking_send(RpcFrame::progress_chunk(self.call_id, chunk))
            .map_err(|_| SinkClosed)
    }
}

/// Remote-call server
pub struct RpcServer {
    listener: TcpListener,
    router: Arc<Router>,
    next_connection: AtomicU64,
    shutdown_token: Option<CancellationToken>,
}

impl RpcServer {
    /// Bind the listening socket
    pub async fn bind(address: &str, router: Arc<Router>) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to bind RPC server to {}", address))?;

        Ok(Self {
            listener,
            router,
            next_connection: AtomicU64::new(1),
            shutdown_token: None,
        })
    }

    /// Set the shutdown token (call before run)
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = Some(token);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the shutdown token fires
    pub async fn run(self) -> Result<()> {
        let shutdown = self.shutdown_token.clone().unwrap_or_default();
        tracing::info!("RPC server listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("RPC server shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let connection = self.next_connection.fetch_add(1, Ordering::Relaxed);
                        let router = Arc::clone(&self.router);
                        tracing::debug!(connection, "Accepted connection from {}", peer);

                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, connection, router).await {
                                tracing::warn!(connection, "Connection error: {}", e);
                            }
                            tracing::debug!(connection, "Connection closed");
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }

        self.router.state().shells.close_all().await;
        Ok(())
    }
}

async fn handle_connection(stream: TcpStream, connection: u64, router: Arc<Router>) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, RpcCodec::new());
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    tokio::spawn(write_frames(FramedWrite::new(write_half, RpcCodec::new()), rx, connection));

    // Progressive calls the client has not ended yet
    let mut open_calls: HashMap<CallId, String> = HashMap::new();

    let result = loop {
        let frame = match frames.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => break Err(anyhow::Error::from(e).context("Failed to read frame")),
            None => break Ok(()),
        };

        let (call_id, procedure, args, progress) = match frame {
            RpcFrame::Call {
                call_id,
                procedure,
                args,
                progress,
            } => (call_id, procedure, args, progress),
            other => {
                tracing::warn!(connection, "Ignoring non-call frame for call {}", other.call_id());
                continue;
            }
        };

        if router.is_progressive(&procedure) {
            if progress {
                open_calls.insert(call_id, procedure.clone());
            } else {
                open_calls.remove(&call_id);
            }
        }

        let invocation = Invocation {
            caller: CallerId::new(connection, call_id),
            procedure,
            args,
            progress,
        };
        let sink = Arc::new(CallSink {
            call_id,
            tx: tx.clone(),
        });

        if let Some(reply) = router.handle(invocation, sink).await.into_frame(call_id) {
            if tx.send(reply).await.is_err() {
                break Ok(());
            }
        }
    };

    // The client is gone: end every call it left open
    for (call_id, procedure) in open_calls.drain() {
        tracing::debug!(connection, call_id, "Ending call left open by disconnect");
        let invocation = Invocation {
            caller: CallerId::new(connection, call_id),
            procedure,
            args: Vec::new(),
            progress: false,
        };
        let sink = Arc::new(CallSink {
            call_id,
            tx: tx.clone(),
        });
        router.handle(invocation, sink).await;
    }

    result
}

async fn write_frames(
    mut sink: FramedWrite<tokio::net::tcp::OwnedWriteHalf, RpcCodec>,
    mut rx: mpsc::Receiver<RpcFrame>,
    connection: u64,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sink.send(frame).await {
            tracing::debug!(connection, "Failed to write frame: {}", e);
            break;
        }
    }
}
