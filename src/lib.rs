//! Event Socks - an event-oriented WebSocket server
//!
//! Peers exchange text frames of the form `<event>:<body>`. The server
//! routes each incoming frame to the handler registered for its event
//! name and lets application code push named messages back to one peer
//! or to every connected peer.

pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod runtime;

// Re-export main components
pub use config::ServerConfig;
pub use constants::*;
pub use crate::core::{EventServer, Session, SessionId, SessionState, SharedSession};
pub use error::{EventSocksError, Result};
