//! deskconnctl: Operator CLI for the deskconn agent
//!
//! Bridges the local terminal to a remote shell on the agent and drives
//! the device pairing procedures by hand.

pub mod client;
pub mod commands;
pub mod output;
pub mod terminal;

pub use client::{Inbound, ProgressiveCall, RemoteError, RpcClient, DEFAULT_AGENT_ADDRESS};
