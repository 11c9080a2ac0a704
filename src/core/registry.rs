//! Event name to handler mapping

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::core::message::Envelope;
use crate::core::session::SharedSession;

/// Application callback for one event name: receives the originating
/// session and the message body
pub type EventHandler = Arc<dyn Fn(&SharedSession, &str) + Send + Sync>;

#[derive(Default)]
pub struct EventRegistry {
    handlers: HashMap<String, EventHandler>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`, replacing any previous registration.
    /// Any string is accepted as an event name, including the empty one.
    pub fn on<F>(&mut self, event: impl Into<String>, handler: F)
    where
        F: Fn(&SharedSession, &str) + Send + Sync + 'static,
    {
        self.handlers.insert(event.into(), Arc::new(handler));
    }

    pub fn lookup(&self, event: &str) -> Option<EventHandler> {
        self.handlers.get(event).cloned()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Route a raw frame to its handler.
    ///
    /// Frames without a separator and frames for unregistered events are
    /// dropped. Returns whether a handler ran.
    pub fn dispatch(&self, session: &SharedSession, raw: &str) -> bool {
        match resolve(raw, |event| self.lookup(event)) {
            Some((handler, body)) => {
                handler(session, body);
                true
            }
            None => false,
        }
    }
}

/// Parse `raw` and find its handler through `lookup`.
///
/// Split out so callers holding the registry behind a lock can release it
/// before invoking the handler.
pub(crate) fn resolve<'a, L>(raw: &'a str, lookup: L) -> Option<(EventHandler, &'a str)>
where
    L: FnOnce(&str) -> Option<EventHandler>,
{
    let Some(envelope) = Envelope::parse(raw) else {
        debug!("Dropping message without event separator ({} bytes)", raw.len());
        return None;
    };

    match lookup(envelope.event) {
        Some(handler) => Some((handler, envelope.body)),
        None => {
            debug!("No handler registered for event '{}'", envelope.event);
            None
        }
    }
}
