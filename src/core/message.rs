//! Wire envelope for event messages
//!
//! Every text frame carries `<event>:<body>`. The event name is everything
//! before the first separator; the body is everything after it and may
//! itself contain separators.

use crate::constants::EVENT_SEPARATOR;

/// A decoded message borrowed from the raw frame text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub event: &'a str,
    pub body: &'a str,
}

impl<'a> Envelope<'a> {
    /// Split a raw frame at the first separator.
    ///
    /// Returns `None` when the frame has no separator at all.
    pub fn parse(raw: &'a str) -> Option<Self> {
        raw.split_once(EVENT_SEPARATOR)
            .map(|(event, body)| Self { event, body })
    }

    /// Encode back into frame text
    pub fn encode(&self) -> String {
        encode(self.event, self.body)
    }
}

/// Build the frame text for `event` and `body`
pub fn encode(event: &str, body: &str) -> String {
    let mut frame = String::with_capacity(event.len() + body.len() + 1);
    frame.push_str(event);
    frame.push(EVENT_SEPARATOR);
    frame.push_str(body);
    frame
}
