//! Command queue scheduling
//!
//! This module handles:
//! - Accepting commands from any number of producers, in submission order
//! - Running exactly one exchange at a time on a single worker task
//! - Broadcasting one success or failure event per exchange
//! - Firing each request's completion callback once, after the event

mod dispatcher;
mod events;
mod queue;

pub use dispatcher::{CommandScheduler, SchedulerError, SchedulerOptions};
pub use events::ExchangeEvent;
pub use queue::{Callback, SchedulerState};
