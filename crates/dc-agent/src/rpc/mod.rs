//! Remote-call transport and procedure routing

mod router;
mod server;

pub use router::{Invocation, Reply, Router, DEFAULT_DEVICE_LABEL};
pub use server::RpcServer;
