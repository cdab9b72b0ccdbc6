//! Device pairing
//!
//! A device proves proximity by claiming a short-lived numeric code, then
//! exchanges Ed25519 public keys with the agent.

mod manager;
mod store;

pub use manager::{PairingManager, SessionSnapshot, SessionStatus, CODE_LENGTH};
pub use store::{ActivePair, PairedDevice, PairingStore};
