//! Procedure names and error URIs

/// Interactive shell bridge (progressive call)
pub const SHELL: &str = "io.xconn.deskconn.deskconnd.shell";

/// Issue a new pairing code
pub const START_PAIRING: &str = "io.xconn.deskconnd.start_pairing";

/// Claim a pairing code from a new device
pub const PAIR: &str = "io.xconn.deskconnd.pair";

/// Exchange public keys for a claimed pairing session
pub const EXCHANGE_KEYS: &str = "exchange.public.keys";

/// Malformed or out-of-range arguments
pub const ERROR_INVALID_ARGUMENT: &str = "wamp.error.invalid_argument";

/// The procedure exists but the operation could not be carried out
pub const ERROR_OPERATION_FAILED: &str = "io.xconn.error";

/// No procedure registered under the requested name
pub const ERROR_NO_SUCH_PROCEDURE: &str = "wamp.error.no_such_procedure";
