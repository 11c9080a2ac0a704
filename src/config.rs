//! Server configuration module
//! Reads listener and runtime parameters from the environment

use crate::constants::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_WORKER_THREADS};
use crate::error::{EventSocksError, Result};
use std::env;
use std::net::{IpAddr, SocketAddr};

/// Server configuration parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of runtime worker threads
    pub worker_threads: usize,
    /// Largest incoming message accepted; `None` keeps the transport default
    pub max_message_size: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            worker_threads: DEFAULT_WORKER_THREADS,
            max_message_size: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    // Unparsable numbers fall back to defaults; a bad host or a zero
    // worker count is an error
    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("EVENT_SOCKS_HOST").unwrap_or(DEFAULT_HOST.to_string());

        let port = lookup("EVENT_SOCKS_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let worker_threads = lookup("EVENT_SOCKS_WORKER_THREADS")
            .and_then(|t| t.parse().ok())
            .unwrap_or(DEFAULT_WORKER_THREADS);

        let max_message_size = lookup("EVENT_SOCKS_MAX_MESSAGE_SIZE")
            .and_then(|m| m.parse().ok());

        let config = Self {
            host,
            port,
            worker_threads,
            max_message_size,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(EventSocksError::ConfigError(
                "EVENT_SOCKS_WORKER_THREADS must be at least 1".to_string()
            ));
        }
        self.socket_addr().map(|_| ())
    }

    /// Address the listener binds to
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.host.parse().map_err(|e| {
            EventSocksError::ConfigError(format!("Invalid host '{}': {}", self.host, e))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}
