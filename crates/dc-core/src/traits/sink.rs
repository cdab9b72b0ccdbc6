//! Outbound side of a progressive call

use thiserror::Error;

/// The call the sink feeds has already finished
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("progressive call is closed")]
pub struct SinkClosed;

/// Delivers session output back to the caller as progress chunks.
///
/// `send` may block until the transport accepts the chunk, so it must be
/// called from a blocking context (the PTY reader thread), never from
/// inside an async task.
pub trait OutputSink: Send + Sync {
    /// Deliver one chunk of output. `None` is the empty end-of-stream
    /// chunk.
    fn send(&self, chunk: Option<&[u8]>) -> Result<(), SinkClosed>;
}
