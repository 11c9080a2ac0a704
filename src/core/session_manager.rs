use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use log::trace;

use crate::core::session::{SessionId, SharedSession};
use crate::error::{EventSocksError, Result};

// Tracks live sessions in accept order, keyed by their stable id
#[derive(Default)]
pub struct SessionManager {
    sessions: BTreeMap<SessionId, SharedSession>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    // Track a session
    pub fn register(&mut self, session: SharedSession) {
        self.sessions.insert(session.id(), session);
    }

    // Stop tracking a session, returning it if it was known
    pub fn unregister(&mut self, id: SessionId) -> Option<SharedSession> {
        self.sessions.remove(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<SharedSession> {
        self.sessions.get(&id).cloned()
    }

    /// Send `event:body` to every tracked session.
    /// Returns how many sessions accepted the message.
    pub fn broadcast(&self, event: &str, body: &str) -> usize {
        let mut success_count = 0;

        for (id, session) in &self.sessions {
            if session.send(event, body) {
                success_count += 1;
            } else {
                trace!("Broadcast of '{}' skipped session {}", event, id);
            }
        }

        success_count
    }

    /// Send `event:body` to a single session
    pub fn send_to(&self, id: SessionId, event: &str, body: &str) -> Result<bool> {
        match self.sessions.get(&id) {
            Some(session) => Ok(session.send(event, body)),
            None => Err(EventSocksError::SessionNotFound(id.to_string())),
        }
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    // Get current sessions count
    pub fn client_count(&self) -> usize {
        self.sessions.len()
    }
}

// Thread-safe session manager wrapper
pub type Sessions = Arc<RwLock<SessionManager>>;

// Create a new thread-safe session manager
pub fn create_session_manager() -> Sessions {
    Arc::new(RwLock::new(SessionManager::new()))
}
