//! Protocol module - Defines the line protocol spoken with the controller
//!
//! The protocol is newline-terminated UTF-8 text:
//! - First token: correlation id linking a request to its response
//! - Second token: verb
//! - Remaining tokens: space-separated arguments (values must not contain spaces)

mod line;

pub use line::*;

/// Default port of the Drops controller
pub const DEFAULT_PORT: u16 = 19406;

/// Verb announcing this node to the controller
pub const VERB_REGISTER: &str = "REGISTER";

/// Verb carrying a periodic measurement report
pub const VERB_METRIC: &str = "METRIC";

/// Verb requesting execution of a named action
pub const VERB_RUN: &str = "RUN";

/// Positive completion reply to a RUN command
pub const VERB_DONE: &str = "DONE";

/// Negative reply to any failed or malformed command
pub const VERB_ERR: &str = "ERR";

/// Acknowledgement that closes an exchange
pub const VERB_ACK: &str = "ACK";
