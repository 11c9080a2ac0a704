use log::{error, info, warn};

use event_socks::config::ServerConfig;
use event_socks::core::EventServer;
use event_socks::runtime::build_runtime;

fn main() {
    // Load .env first so RUST_LOG may come from it
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    env_logger::init();

    match dotenv {
        Ok(path) => info!("Environment variables loaded from {}", path.display()),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration: host={}, port={}, workers={}",
        config.host, config.port, config.worker_threads
    );

    let runtime = match build_runtime(&config) {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let server = EventServer::from_config(runtime.handle().clone(), &config);

    server.on("ping", |session, body| {
        session.send("pong", body);
    });

    let chat = server.clone();
    server.on("chat", move |session, body| {
        let delivered = chat.broadcast("chat", body);
        info!("Session {} chatted to {} peers", session.id(), delivered);
    });

    let addr = match config.socket_addr().and_then(|addr| server.listen_on(addr)) {
        Ok(addr) => addr,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!("Event Socks server running on ws://{}", addr);

    runtime.block_on(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to wait for shutdown signal: {}", e);
        }
    });

    info!("Shutting down");
}
