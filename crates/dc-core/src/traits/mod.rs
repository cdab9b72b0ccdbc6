//! Core trait definitions

mod sink;

pub use sink::{OutputSink, SinkClosed};
