//! WebSocket session lifecycle
//!
//! A session owns one accepted connection. It performs the handshake,
//! forwards queued outbound frames through a dedicated writer task and
//! runs a strictly sequential read loop: the next frame is only read once
//! the handler for the previous one has returned.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use futures_util::sink::{Sink, SinkExt};
use futures_util::stream::{Stream, StreamExt};
use log::{debug, error, info, trace, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::core::message::encode;
use crate::error::{EventSocksError, Result};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identifier of a session, increasing in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, transport not started yet
    Idle,
    Handshaking,
    /// Waiting for the next frame
    Reading,
    /// Running the message handler for the last frame
    Dispatching,
    /// Terminal; no further reads or writes
    Closed,
}

/// Callback invoked once per received text frame with the raw frame text
pub type MessageHandler = Arc<dyn Fn(&SharedSession, &str) + Send + Sync>;

pub type SharedSession = Arc<Session>;

/// Server-side representative of one upgraded WebSocket connection
pub struct Session {
    id: SessionId,
    connected_at: Instant,
    state: Mutex<SessionState>,
    sender: mpsc::UnboundedSender<Message>,
    outbox: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    handler: RwLock<Option<MessageHandler>>,
    max_message_size: Option<usize>,
}

impl Session {
    /// Create an idle session using the transport's default message limit
    pub fn new() -> SharedSession {
        Self::with_max_message_size(None)
    }

    /// Create an idle session that rejects incoming messages above `limit` bytes
    pub fn with_max_message_size(limit: Option<usize>) -> SharedSession {
        let (sender, outbox) = mpsc::unbounded_channel();
        Arc::new(Self {
            id: SessionId::next(),
            connected_at: Instant::now(),
            state: Mutex::new(SessionState::Idle),
            sender,
            outbox: Mutex::new(Some(outbox)),
            handler: RwLock::new(None),
            max_message_size: limit,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// How long ago the connection was accepted
    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Register the per-message callback, replacing any previous one
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&SharedSession, &str) + Send + Sync + 'static,
    {
        let mut slot = self.handler.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(handler));
    }

    /// Queue `event:body` for delivery to the peer.
    ///
    /// Returns `false` without queueing when the session is closed or its
    /// writer has stopped.
    pub fn send(&self, event: &str, body: &str) -> bool {
        if self.is_closed() {
            debug!("Dropping '{}' for closed session {}", event, self.id);
            return false;
        }

        match self.sender.send(Message::text(encode(event, body))) {
            Ok(_) => true,
            Err(_) => {
                warn!("Failed to send message to session {}", self.id);
                false
            }
        }
    }

    /// Spawn [`Session::run`] on the current runtime
    pub fn start<S>(self: &Arc<Self>, stream: S) -> JoinHandle<Result<()>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        tokio::spawn(Arc::clone(self).run(stream))
    }

    /// Perform the handshake on `stream`, then read until the peer goes away.
    ///
    /// Only a handshake failure is reported as an error; a read failure is
    /// the normal end of a session.
    pub async fn run<S>(self: Arc<Self>, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let outbox = match self.take_outbox() {
            Some(outbox) => outbox,
            None => {
                warn!("Session {} was already started", self.id);
                return Ok(());
            }
        };

        self.set_state(SessionState::Handshaking);
        let ws_stream = match accept_async_with_config(stream, Some(self.transport_config())).await {
            Ok(ws) => ws,
            Err(e) => {
                self.close();
                return Err(EventSocksError::Handshake(e.to_string()));
            }
        };

        info!("Session {} connected", self.id);

        let (ws_tx, ws_rx) = ws_stream.split();
        let writer = tokio::spawn(write_loop(self.id, ws_tx, outbox));
        let _teardown = Teardown {
            session: &*self,
            writer,
        };

        self.read_loop(ws_rx).await;

        info!(
            "Session {} disconnected after {:?}",
            self.id,
            self.connection_duration()
        );
        Ok(())
    }

    /// Read frames until the stream ends or fails, dispatching text frames in order
    pub(crate) async fn read_loop<R>(self: &Arc<Self>, mut frames: R)
    where
        R: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
    {
        self.set_state(SessionState::Reading);

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    self.set_state(SessionState::Dispatching);
                    self.dispatch(&text);
                    self.set_state(SessionState::Reading);
                }
                Ok(Message::Binary(data)) => {
                    debug!("Ignoring {} byte binary frame from session {}", data.len(), self.id);
                }
                Ok(Message::Close(frame)) => {
                    // Keep polling so the transport flushes its close reply;
                    // the stream ends right after
                    debug!("Session {} sent close: {:?}", self.id, frame);
                }
                Ok(_) => trace!("Control frame from session {}", self.id),
                Err(e) => {
                    debug!("Read failed on session {}: {}", self.id, e);
                    break;
                }
            }
        }

        self.close();
    }

    fn dispatch(self: &Arc<Self>, text: &str) {
        // Clone out of the lock so the handler may replace itself
        let handler = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match handler {
            Some(handler) => handler(self, text),
            None => trace!("No message handler on session {}", self.id),
        }
    }

    /// Move to `Closed` and drop the message handler
    pub(crate) fn close(&self) {
        self.set_state(SessionState::Closed);
        self.handler
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub(crate) fn take_outbox(&self) -> Option<mpsc::UnboundedReceiver<Message>> {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn transport_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        if let Some(limit) = self.max_message_size {
            config.max_message_size = Some(limit);
        }
        config
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

// Stops the writer and closes the session on every exit from `run`,
// including a handler panic unwinding through the read loop
struct Teardown<'a> {
    session: &'a Session,
    writer: JoinHandle<()>,
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        self.writer.abort();
        self.session.close();
    }
}

// Forward queued frames to the socket until the queue closes or a write fails
async fn write_loop<W>(id: SessionId, mut sink: W, mut outbox: mpsc::UnboundedReceiver<Message>)
where
    W: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(message) = outbox.recv().await {
        if let Err(e) = sink.send(message).await {
            error!("Failed to write to session {}: {}", id, e);
            break;
        }
    }
}
