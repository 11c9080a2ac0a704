use std::error::Error;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::PoisonError;

#[derive(Debug)]
pub enum EventSocksError {
    // Listener errors
    Bind { addr: SocketAddr, source: io::Error },

    // Session errors
    SessionLock(String),
    SessionNotFound(String),

    // Connection errors
    ConnectionClosed,
    Handshake(String),

    // Configuration errors
    ConfigError(String),

    // System errors
    SystemError(String),
}

impl fmt::Display for EventSocksError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { addr, source } => write!(f, "Failed to bind {}: {}", addr, source),
            Self::SessionLock(msg) => write!(f, "Session lock error: {}", msg),
            Self::SessionNotFound(id) => write!(f, "Session not found: {}", id),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Handshake(msg) => write!(f, "WebSocket handshake failed: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::SystemError(msg) => write!(f, "System error: {}", msg),
        }
    }
}

impl Error for EventSocksError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Bind { source, .. } => Some(source),
            _ => None,
        }
    }
}

// Converting from PoisonError to facilitate poisoned lock handling
impl<T> From<PoisonError<T>> for EventSocksError {
    fn from(err: PoisonError<T>) -> Self {
        EventSocksError::SessionLock(format!("Lock poisoned: {}", err))
    }
}

// Generic result type for event-socks
pub type Result<T> = std::result::Result<T, EventSocksError>;
