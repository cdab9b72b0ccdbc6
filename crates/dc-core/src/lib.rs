//! dc-core: Core abstractions and configuration for deskconn
//!
//! This crate provides the types, traits, error taxonomy and configuration
//! shared by the agent daemon and the operator CLI.

pub mod config;
pub mod error;
pub mod paths;
pub mod traits;
pub mod types;

pub use error::ErrorKind;
pub use paths::DataDir;
pub use traits::{OutputSink, SinkClosed};
pub use types::CallerId;
