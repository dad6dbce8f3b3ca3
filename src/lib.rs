//! NorthStar command controller
//!
//! Sends drone commands to a NorthStar agent daemon over TCP. Each command is
//! a single JSON exchange on its own connection, and the scheduler keeps
//! exchanges strictly ordered with at most one on the wire at a time.

pub mod client;
pub mod config;
pub mod scheduler;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::{ExchangeOutcome, ProtocolClient};
pub use config::{ConfigError, ControllerConfig};
pub use northstar_shared::{Command, CommandError, CommandKind, Param, UnknownCommandPolicy};
pub use scheduler::{CommandScheduler, ExchangeEvent, SchedulerError, SchedulerOptions, SchedulerState};
