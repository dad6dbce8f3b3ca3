//! Simulated fleet of linked agents
//!
//! This module handles:
//! - Tracking which agents are linked to the daemon
//! - Applying actions to an agent immediately or queueing them for launch
//! - Reporting per-agent status

mod agent;
mod registry;

pub use agent::AgentAction;
pub use registry::{Fleet, FleetError};
