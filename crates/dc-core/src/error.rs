//! Core error types for deskconn

use std::path::PathBuf;

use dc_protocol::procedures::{ERROR_INVALID_ARGUMENT, ERROR_OPERATION_FAILED};
use dc_protocol::{DirectiveError, KeyBlobError};
use thiserror::Error;

/// Coarse classification used to pick a reply for the remote caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input; the caller should not retry unchanged
    InvalidArgument,
    /// Unknown code or session
    NotFound,
    /// Code past its validity window
    Expired,
    /// Operation not valid in the current state
    Conflict,
    /// Process, terminal or file operation failed
    OperationFailed,
}

impl ErrorKind {
    /// Error URI reported to remote callers
    pub fn uri(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => ERROR_INVALID_ARGUMENT,
            _ => ERROR_OPERATION_FAILED,
        }
    }
}

/// Shell session errors
#[derive(Error, Debug)]
pub enum ShellError {
    /// Resize directive could not be applied
    #[error("{0}")]
    Directive(#[from] DirectiveError),

    /// Chunk payload was not a byte string
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Shell process or pseudo-terminal could not be created
    #[error("failed to start PTY: {0}")]
    Spawn(String),

    /// Writing to the pseudo-terminal failed
    #[error("failed to write to PTY: {0}")]
    Write(String),

    /// Applying new dimensions failed
    #[error("failed to resize PTY: {0}")]
    Resize(String),
}

impl ShellError {
    /// Classification for the remote caller
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShellError::Directive(_) | ShellError::InvalidPayload(_) => ErrorKind::InvalidArgument,
            ShellError::Spawn(_) | ShellError::Write(_) | ShellError::Resize(_) => {
                ErrorKind::OperationFailed
            }
        }
    }
}

/// Pairing and key-exchange errors.
///
/// Display strings double as the failure reasons returned to devices.
#[derive(Error, Debug)]
pub enum PairingError {
    /// No active or persisted pairing code
    #[error("pairing not found")]
    PairingNotFound,

    /// Code does not match the active one
    #[error("invalid code")]
    InvalidCode,

    /// Code is past its expiry
    #[error("code expired")]
    CodeExpired,

    /// Unknown pairing session
    #[error("pairing session not found")]
    SessionNotFound,

    /// Session already went through key exchange
    #[error("pairing already completed")]
    AlreadyCompleted,

    /// A key exchange for this session is still running
    #[error("key exchange in progress")]
    ExchangeInProgress,

    /// Device identifier is empty or contains whitespace or control characters
    #[error("invalid device ID")]
    InvalidDeviceId,

    /// Device identifier differs from the one that claimed the session
    #[error("device ID mismatch")]
    DeviceMismatch,

    /// Public key was not valid base64
    #[error("invalid base64: {0}")]
    InvalidBase64(String),

    /// Public key had the wrong length
    #[error("invalid public key size")]
    InvalidKeySize { expected: usize, actual: usize },

    /// Authorized key could not be persisted
    #[error("failed to save key: {0}")]
    SaveKey(String),

    /// Agent identity could not be loaded or created
    #[error("failed to get desktop key: {0}")]
    Identity(#[from] IdentityError),

    /// Durable pairing state could not be read or written
    #[error("pairing storage error: {0}")]
    Storage(String),
}

impl PairingError {
    /// Classification for the remote caller
    pub fn kind(&self) -> ErrorKind {
        match self {
            PairingError::PairingNotFound
            | PairingError::SessionNotFound => ErrorKind::NotFound,
            PairingError::InvalidCode
            | PairingError::InvalidDeviceId
            | PairingError::DeviceMismatch
            | PairingError::InvalidBase64(_)
            | PairingError::InvalidKeySize { .. } => ErrorKind::InvalidArgument,
            PairingError::CodeExpired => ErrorKind::Expired,
            PairingError::AlreadyCompleted | PairingError::ExchangeInProgress => {
                ErrorKind::Conflict
            }
            PairingError::SaveKey(_) | PairingError::Identity(_) | PairingError::Storage(_) => {
                ErrorKind::OperationFailed
            }
        }
    }
}

/// Key identity store errors
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Reading or writing a key file failed
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Public key file is not in the expected format
    #[error("invalid public key format")]
    InvalidFormat,

    /// Public key envelope is malformed
    #[error("{0}")]
    Envelope(#[from] KeyBlobError),

    /// Keypair generation or encoding failed
    #[error("key generation failed: {0}")]
    Generate(String),
}

impl IdentityError {
    /// Wrap an I/O error with the file it concerns
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IdentityError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
