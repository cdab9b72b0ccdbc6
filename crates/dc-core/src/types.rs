//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the originator of one in-flight remote call.
///
/// The connection number is assigned by the agent when the connection is
/// accepted; the call number is chosen by the client. Together they are
/// unique per logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallerId {
    /// Connection the call arrived on
    pub connection: u64,
    /// Call number within that connection
    pub call: u64,
}

impl CallerId {
    /// Create a new caller identifier
    pub fn new(connection: u64, call: u64) -> Self {
        Self { connection, call }
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.connection, self.call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_id_display() {
        assert_eq!(CallerId::new(3, 17).to_string(), "3:17");
    }

    #[test]
    fn test_caller_id_distinguishes_connections() {
        assert_ne!(CallerId::new(1, 1), CallerId::new(2, 1));
        assert_ne!(CallerId::new(1, 1), CallerId::new(1, 2));
    }
}
