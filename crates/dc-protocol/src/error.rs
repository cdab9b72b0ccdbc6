//! Protocol error types

use thiserror::Error;

/// Errors that can occur while framing remote-call messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A line exceeded the maximum frame length
    #[error("Frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// The line was not a valid frame
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
