//! Scheduling context for the server
//!
//! Builds the multi-threaded tokio runtime that drives every accept,
//! read and write. Sessions and the registry are lock-protected, so any
//! worker count is safe.

use log::info;
use tokio::runtime::{Builder, Runtime};

use crate::config::ServerConfig;
use crate::error::{EventSocksError, Result};

/// Build the runtime described by `config`
///
/// # Arguments
/// * `config` - Server configuration holding the worker thread count
///
/// # Returns
/// A `Result` containing the `Runtime` or an error
pub fn build_runtime(config: &ServerConfig) -> Result<Runtime> {
    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_io()
        .enable_time()
        .thread_name("event-socks-worker")
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            return Err(EventSocksError::SystemError(format!(
                "Failed to build runtime: {}",
                e
            )))
        }
    };

    info!("Created runtime with {} worker threads", config.worker_threads);

    Ok(runtime)
}
