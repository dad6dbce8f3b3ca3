//! Wire protocol client
//!
//! This module handles:
//! - Opening one connection per command
//! - Writing the encoded request and half-closing the send side
//! - Reading until the agent closes the connection
//! - Turning the decoded response (or any transport failure) into an outcome

mod protocol;

pub use protocol::{ExchangeError, ExchangeOutcome, ProtocolClient, Reply};
