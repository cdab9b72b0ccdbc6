//! Shell command: bridge the local terminal to a remote shell

use std::io::{Read, Write};

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use dc_protocol::procedures;

use crate::client::{Inbound, ProgressiveCall, RpcClient};
use crate::terminal::{size_directive, RawModeGuard, SessionSignal, SessionSignals};

/// Outbound chunks buffered before local input waits
const OUTBOUND_QUEUE: usize = 64;

/// Local input read size
const INPUT_BUFFER_SIZE: usize = 4096;

/// How a shell session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The agent sent the empty end-of-stream chunk or a final result
    Remote,
    /// The connection to the agent dropped
    Disconnected,
    /// A termination signal arrived locally
    Signalled,
}

/// Execute the shell command
pub async fn shell_command(address: &str) -> Result<()> {
    let client = RpcClient::connect(address)
        .await
        .context("Failed to start remote shell")?;
    let mut signals = SessionSignals::install().context("Failed to start remote shell")?;
    let mut guard = RawModeGuard::enable()?;

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    outbound_tx
        .send(Some(size_directive()))
        .await
        .context("Failed to start remote shell")?;
    spawn_input_reader(outbound_tx.clone());

    let call = client.progressive(procedures::SHELL, outbound_rx);
    let result = run_session(call, &outbound_tx, &mut signals, std::io::stdout()).await;
    guard.restore();

    match result? {
        SessionEnd::Disconnected => anyhow::bail!("Connection to agent closed"),
        end => {
            tracing::debug!("Shell session ended: {:?}", end);
            Ok(())
        }
    }
}

/// Pump inbound frames to `output` until the session ends.
///
/// Resize signals send a fresh directive through `outbound`.
pub async fn run_session<W: Write>(
    mut call: ProgressiveCall,
    outbound: &mpsc::Sender<Option<Vec<u8>>>,
    signals: &mut SessionSignals,
    mut output: W,
) -> Result<SessionEnd> {
    loop {
        tokio::select! {
            inbound = call.next() => match inbound? {
                Some(Inbound::Chunk(data)) if data.is_empty() => return Ok(SessionEnd::Remote),
                Some(Inbound::Chunk(data)) => {
                    output.write_all(&data).context("Failed to write to stdout")?;
                    output.flush().context("Failed to flush stdout")?;
                }
                Some(Inbound::Final(_)) => return Ok(SessionEnd::Remote),
                Some(Inbound::Failed(e)) => {
                    tracing::warn!("Agent rejected input: {}", e);
                }
                None => return Ok(SessionEnd::Disconnected),
            },
            signal = signals.recv() => match signal {
                SessionSignal::Resize => {
                    // A closed channel means local input has ended; keep draining output
                    let _ = outbound.send(Some(size_directive())).await;
                }
                SessionSignal::Terminate => return Ok(SessionEnd::Signalled),
            },
        }
    }
}

/// Forward local stdin as outbound chunks, ending with `None` at EOF.
///
/// Runs on a plain thread: a blocking stdin read cannot be cancelled and
/// must not hold up runtime shutdown.
fn spawn_input_reader(outbound: mpsc::Sender<Option<Vec<u8>>>) {
    let spawned = std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || forward_input(std::io::stdin().lock(), &outbound));

    if let Err(e) = spawned {
        tracing::error!("Failed to spawn stdin reader: {}", e);
    }
}

fn forward_input<R: Read>(mut input: R, outbound: &mpsc::Sender<Option<Vec<u8>>>) {
    let mut buf = [0u8; INPUT_BUFFER_SIZE];
    loop {
        match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if outbound.blocking_send(Some(buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!("stdin read failed: {}", e);
                break;
            }
        }
    }
    let _ = outbound.blocking_send(None);
}
