//! Core functionality for the event server

pub mod message;
pub mod registry;
pub mod server;
pub mod session;
pub mod session_manager;

// Re-export main components for convenience
pub use message::{encode, Envelope};
pub use registry::{EventHandler, EventRegistry};
pub use server::EventServer;
pub use session::{MessageHandler, Session, SessionId, SessionState, SharedSession};
pub use session_manager::{create_session_manager, SessionManager, Sessions};
