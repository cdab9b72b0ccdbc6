//! Caller-scoped shell sessions
//!
//! Every progressive call on the shell procedure owns at most one PTY
//! session, created lazily by its first chunk. The map lock is held only for
//! lookup, insert and removal; process and terminal I/O happen on blocking
//! threads against a session handle.

use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

use dc_core::error::ShellError;
use dc_core::{CallerId, OutputSink};
use dc_protocol::{ShellInput, TerminalSize};

use super::pty::{PtyBridge, ShellCommand};

/// Size of one PTY read, and so the largest outbound chunk
const READ_BUFFER_SIZE: usize = 4096;

/// A registry entry. The bridge is filled in once by whichever chunk
/// reaches the entry first.
struct SessionSlot {
    bridge: OnceCell<Arc<PtyBridge>>,
}

struct RegistryInner {
    sessions: Mutex<HashMap<CallerId, Arc<SessionSlot>>>,
    shell: ShellCommand,
}

/// Maps caller identifiers to live shell sessions
#[derive(Clone)]
pub struct ShellRegistry {
    inner: Arc<RegistryInner>,
}

impl ShellRegistry {
    pub fn new(shell: ShellCommand) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                shell,
            }),
        }
    }

    /// Route one shell chunk.
    ///
    /// With `progress` set the chunk is a resize directive or terminal
    /// input, creating the caller's session first if needed. Without it the
    /// call is over and the caller's session, if any, is torn down.
    pub async fn dispatch(
        &self,
        caller: CallerId,
        chunk: &[u8],
        progress: bool,
        sink: Arc<dyn OutputSink>,
    ) -> Result<(), ShellError> {
        if !progress {
            self.close(caller).await;
            return Ok(());
        }

        // Reject bad directives before any session exists
        let input = ShellInput::parse(chunk)?;

        let bridge = self.session(caller, sink).await?;
        match input {
            ShellInput::Resize(size) => {
                tracing::debug!(caller = %caller, "Resizing shell to {}x{}", size.cols, size.rows);
                run_blocking(move || bridge.resize(size)).await
            }
            ShellInput::Data(data) => {
                let data = data.to_vec();
                run_blocking(move || bridge.write(&data)).await
            }
        }
    }

    /// Tear down the caller's session. A missing session is not an error.
    pub async fn close(&self, caller: CallerId) {
        let removed = self.inner.sessions.lock().await.remove(&caller);
        let Some(bridge) = removed.and_then(|slot| slot.bridge.get().cloned()) else {
            return;
        };

        tracing::info!(caller = %caller, "Closing shell session");
        if let Err(e) = tokio::task::spawn_blocking(move || bridge.terminate()).await {
            tracing::warn!(caller = %caller, "Shell teardown task failed: {}", e);
        }
    }

    /// Tear down every session
    pub async fn close_all(&self) {
        let callers: Vec<CallerId> = self.inner.sessions.lock().await.keys().copied().collect();
        for caller in callers {
            self.close(caller).await;
        }
    }

    pub async fn contains(&self, caller: CallerId) -> bool {
        self.inner.sessions.lock().await.contains_key(&caller)
    }

    pub async fn len(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Process id of the caller's shell, once it has started
    pub async fn pid(&self, caller: CallerId) -> Option<u32> {
        let sessions = self.inner.sessions.lock().await;
        sessions
            .get(&caller)
            .and_then(|slot| slot.bridge.get())
            .and_then(|bridge| bridge.pid())
    }

    /// Lookup-or-create. The map lock covers only the slot lookup; the
    /// spawn runs on a blocking thread and concurrent callers for the same
    /// slot wait on its `OnceCell`.
    async fn session(
        &self,
        caller: CallerId,
        sink: Arc<dyn OutputSink>,
    ) -> Result<Arc<PtyBridge>, ShellError> {
        let slot = {
            let mut sessions = self.inner.sessions.lock().await;
            Arc::clone(sessions.entry(caller).or_insert_with(|| {
                Arc::new(SessionSlot {
                    bridge: OnceCell::new(),
                })
            }))
        };

        let result = slot
            .bridge
            .get_or_try_init(|| self.start(caller, Arc::clone(&slot), sink))
            .await
            .cloned();

        if result.is_err() {
            self.remove_slot(caller, &slot).await;
        }
        result
    }

    async fn start(
        &self,
        caller: CallerId,
        slot: Arc<SessionSlot>,
        sink: Arc<dyn OutputSink>,
    ) -> Result<Arc<PtyBridge>, ShellError> {
        tracing::info!(caller = %caller, "Starting shell session");

        let shell = self.inner.shell.clone();
        let (bridge, reader) =
            run_blocking(move || PtyBridge::spawn(&shell, TerminalSize::default())).await?;
        let bridge = Arc::new(bridge);

        let registry = self.clone();
        let pty = Arc::clone(&bridge);
        tokio::task::spawn_blocking(move || {
            pump_output(caller, reader, sink.as_ref());
            registry.finish(caller, &slot, &pty);
        });

        Ok(bridge)
    }

    /// Reader-side teardown, on a blocking thread after end of stream
    fn finish(&self, caller: CallerId, slot: &Arc<SessionSlot>, bridge: &PtyBridge) {
        {
            let mut sessions = self.inner.sessions.blocking_lock();
            if sessions
                .get(&caller)
                .is_some_and(|current| Arc::ptr_eq(current, slot))
            {
                sessions.remove(&caller);
            }
        }

        let exit = bridge.terminate();
        tracing::info!(caller = %caller, "Shell session ended (exit {:?})", exit);
    }

    async fn remove_slot(&self, caller: CallerId, slot: &Arc<SessionSlot>) {
        let mut sessions = self.inner.sessions.lock().await;
        if sessions
            .get(&caller)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            sessions.remove(&caller);
        }
    }
}

/// Forward PTY output until end of stream, then send the empty final chunk
fn pump_output(caller: CallerId, mut reader: Box<dyn Read + Send>, sink: &dyn OutputSink) {
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                tracing::debug!(caller = %caller, "PTY reader EOF");
                break;
            }
            Ok(n) => {
                if sink.send(Some(&buf[..n])).is_err() {
                    tracing::debug!(caller = %caller, "Shell output sink closed");
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                // Linux reports EIO once the slave side is gone
                tracing::debug!(caller = %caller, "PTY reader closed: {}", e);
                break;
            }
        }
    }

    if sink.send(None).is_err() {
        tracing::debug!(caller = %caller, "Caller gone before final shell chunk");
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, ShellError>
where
    F: FnOnce() -> Result<T, ShellError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ShellError::Spawn(format!("blocking task failed: {}", e)))?
}
