//! CLI command implementations

pub mod pair;
mod shell;

pub use shell::{run_session, shell_command, SessionEnd};
