//! Event server: owns the listener, the event registry and the tracked sessions

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, error, info, warn};
use tokio::io::{self, AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpSocket};
use tokio::runtime::Handle;

use crate::config::ServerConfig;
use crate::constants::LISTEN_BACKLOG;
use crate::core::registry::{resolve, EventRegistry};
use crate::core::session::{Session, SessionId, SharedSession};
use crate::core::session_manager::{create_session_manager, SessionManager, Sessions};
use crate::error::{EventSocksError, Result};

/// Accepts WebSocket connections and routes `<event>:<body>` frames to
/// registered handlers.
///
/// Cloning is cheap; all clones share the same registry and sessions.
/// Sessions are removed as soon as their connection ends.
#[derive(Clone)]
pub struct EventServer {
    runtime: Handle,
    registry: Arc<RwLock<EventRegistry>>,
    sessions: Sessions,
    max_message_size: Option<usize>,
}

impl EventServer {
    /// Create a server whose connections are driven by `runtime`
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            registry: Arc::new(RwLock::new(EventRegistry::new())),
            sessions: create_session_manager(),
            max_message_size: None,
        }
    }

    /// Create a server on the runtime of the calling task.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    pub fn from_config(runtime: Handle, config: &ServerConfig) -> Self {
        Self::new(runtime).with_max_message_size(config.max_message_size)
    }

    /// Limit the size of incoming messages for sessions accepted from now on
    pub fn with_max_message_size(mut self, limit: Option<usize>) -> Self {
        self.max_message_size = limit;
        self
    }

    /// Register `handler` for `event`; a later registration for the same
    /// name replaces it
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&SharedSession, &str) + Send + Sync + 'static,
    {
        let event = event.into();
        match self.registry.write() {
            Ok(mut registry) => {
                debug!("Registered handler for event '{}'", event);
                registry.on(event, handler);
            }
            Err(e) => error!("Failed to register handler for '{}': {}", event, e),
        }
    }

    /// Listen on every local IPv4 address at `port`.
    ///
    /// Returns the bound address, so port 0 picks a free port.
    pub fn listen(&self, port: u16) -> Result<SocketAddr> {
        self.listen_on(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    }

    /// Bind `addr` with address reuse enabled and start accepting connections
    pub fn listen_on(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let listener = {
            let _guard = self.runtime.enter();
            bind_listener(addr).map_err(|source| EventSocksError::Bind { addr, source })?
        };
        let local_addr = listener
            .local_addr()
            .map_err(|source| EventSocksError::Bind { addr, source })?;

        info!("Listening for WebSocket connections on {}", local_addr);
        self.runtime.spawn(accept_loop(listener, self.clone()));

        Ok(local_addr)
    }

    /// Send `event:body` to every tracked session; identical to [`EventServer::broadcast`]
    pub fn emit(&self, event: &str, body: &str) -> usize {
        self.broadcast(event, body)
    }

    /// Send `event:body` to every tracked session.
    /// Returns how many sessions accepted the message.
    pub fn broadcast(&self, event: &str, body: &str) -> usize {
        match self.read_sessions() {
            Ok(sessions) => {
                let sent = sessions.broadcast(event, body);
                debug!("Broadcast '{}' to {} sessions", event, sent);
                sent
            }
            Err(e) => {
                error!("Failed to broadcast '{}': {}", event, e);
                0
            }
        }
    }

    /// Send `event:body` to one tracked session
    pub fn send_to(&self, id: SessionId, event: &str, body: &str) -> Result<bool> {
        self.read_sessions()?.send_to(id, event, body)
    }

    pub fn session(&self, id: SessionId) -> Option<SharedSession> {
        self.read_sessions().ok()?.get(id)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.read_sessions()
            .map(|sessions| sessions.ids())
            .unwrap_or_default()
    }

    pub fn session_count(&self) -> usize {
        self.read_sessions()
            .map(|sessions| sessions.client_count())
            .unwrap_or(0)
    }

    /// Track a new connection, wire its frames to the registry and start it.
    ///
    /// The session is closed and untracked again once its task ends,
    /// whether the handshake failed, the peer went away or a handler
    /// panicked.
    pub fn attach<S>(&self, stream: S) -> SharedSession
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let session = Session::with_max_message_size(self.max_message_size);
        let id = session.id();

        let registry = Arc::clone(&self.registry);
        session.on_message(move |session, raw| route_message(&registry, session, raw));

        match self.write_sessions() {
            Ok(mut sessions) => sessions.register(Arc::clone(&session)),
            Err(e) => error!("Failed to track session {}: {}", id, e),
        }

        let sessions = Arc::clone(&self.sessions);
        let task_session = Arc::clone(&session);
        let connection = self.runtime.spawn(Arc::clone(&session).run(stream));
        self.runtime.spawn(async move {
            match connection.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Session {} discarded: {}", id, e),
                Err(e) if e.is_panic() => error!("Handler panicked on session {}", id),
                Err(e) => warn!("Session {} task failed: {}", id, e),
            }
            task_session.close();

            match sessions.write() {
                Ok(mut sessions) => {
                    sessions.unregister(id);
                    debug!("Session {} untracked, {} remaining", id, sessions.client_count());
                }
                Err(e) => error!("Failed to untrack session {}: {}", id, e),
            }
        });

        session
    }

    fn read_sessions(&self) -> Result<RwLockReadGuard<'_, SessionManager>> {
        Ok(self.sessions.read()?)
    }

    fn write_sessions(&self) -> Result<RwLockWriteGuard<'_, SessionManager>> {
        Ok(self.sessions.write()?)
    }
}

fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

// A failed accept never stops the loop
async fn accept_loop(listener: TcpListener, server: EventServer) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let session = server.attach(stream);
                debug!("Accepted {} as session {}", peer, session.id());
            }
            Err(e) => warn!("Failed to accept connection: {}", e),
        }
    }
}

// The registry lock is released before the handler runs
fn route_message(registry: &RwLock<EventRegistry>, session: &SharedSession, raw: &str) {
    let resolved = match registry.read() {
        Ok(registry) => resolve(raw, |event| registry.lookup(event)),
        Err(e) => {
            error!("Event registry unavailable: {}", e);
            return;
        }
    };

    if let Some((handler, body)) = resolved {
        handler(session, body);
    }
}
