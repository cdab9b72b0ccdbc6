//! dc-agent: deskconn agent daemon
//!
//! The agent exposes interactive shells over progressive remote calls and
//! lets new devices pair with it through a short-lived code and an Ed25519
//! key exchange.

pub mod authorized_keys;
pub mod identity;
pub mod pairing;
pub mod rpc;
pub mod shell;
pub mod state;

pub use state::AgentState;
