//! dc-protocol: Wire vocabulary for deskconn
//!
//! This crate defines what travels between the desktop agent and its
//! clients: remote-call frames and their line codec, the in-band shell
//! resize directive, and the binary public-key envelope used in the
//! pairing key exchange. It performs no I/O of its own.

pub mod codec;
pub mod directive;
pub mod error;
pub mod frame;
pub mod keyblob;
pub mod procedures;

pub use codec::RpcCodec;
pub use directive::{DirectiveError, ShellInput, TerminalSize, RESIZE_PREFIX};
pub use error::ProtocolError;
pub use frame::{CallId, RpcFrame, MAX_LINE_LENGTH};
pub use keyblob::{KeyBlob, KeyBlobError, ED25519_KEY_TYPE};
