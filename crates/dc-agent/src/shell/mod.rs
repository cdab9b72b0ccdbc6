//! Remote shell sessions over pseudo-terminals

mod pty;
mod registry;

pub use pty::{PtyBridge, ShellCommand};
pub use registry::ShellRegistry;
