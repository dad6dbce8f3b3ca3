//! Request handling for the agent daemon
//!
//! This module handles:
//! - Parsing one JSON request per connection
//! - Dispatching it by `action` to the fleet
//! - Building the JSON response, including failures

mod handler;

pub use handler::RequestHandler;
