//! NorthStar Shared Protocol Types
//!
//! This crate provides the command model and JSON codec shared by the
//! controller (which sends commands) and the agent daemon (which answers
//! them).

pub mod codec;
pub mod command;

// Re-export commonly used types at crate root
pub use codec::{encode_request, encode_response, CodecError, Response, ResponseAccumulator};
pub use command::{ArgValue, Command, CommandError, CommandKind, Param, UnknownCommandPolicy};

/// Wire protocol parameters
pub mod protocol {
    /// Default agent daemon host
    pub const DEFAULT_HOST: &str = "127.0.0.1";

    /// Default agent daemon port
    pub const DEFAULT_PORT: u16 = 7777;

    /// Size of the buffer used for each socket read
    pub const READ_CHUNK_SIZE: usize = 4096;

    /// Connect timeout applied unless configured otherwise
    pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

    /// Whole-exchange timeout applied unless configured otherwise.
    /// Agents may hold the connection open while a non-queued delay runs.
    pub const EXCHANGE_TIMEOUT_MS: u64 = 60_000;
}
