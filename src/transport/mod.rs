//! Connection transports for agent exchanges
//!
//! Every exchange opens a fresh stream through a [`TransportConnector`] and
//! drops it when done; nothing is pooled or reused.

pub mod tcp;
pub mod traits;

pub use tcp::TcpConnector;
pub use traits::{TransportConnector, TransportStream};
