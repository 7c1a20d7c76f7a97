//! The capability surface handed to application callbacks.
//!
//! A [`ServerContext`] borrows the registry for the duration of one
//! callback, so a handler can send, broadcast and request disconnects
//! without the registry ever being shared across threads. Disconnects
//! requested from inside a callback are deferred and applied by the
//! reactor when the callback returns.

use draftsock_proto::{write_all, Protocol};
use serde_json::Value;
use tracing::{debug, warn};

use crate::registry::Registry;

pub struct ServerContext<'a> {
    registry: &'a mut Registry,
    drafts: &'a [Box<dyn Protocol>],
    current: usize,
    pending_disconnects: Vec<usize>,
}

impl<'a> ServerContext<'a> {
    pub(crate) fn new(
        registry: &'a mut Registry,
        drafts: &'a [Box<dyn Protocol>],
        current: usize,
    ) -> Self {
        Self {
            registry,
            drafts,
            current,
            pending_disconnects: Vec::new(),
        }
    }

    pub(crate) fn into_pending_disconnects(self) -> Vec<usize> {
        self.pending_disconnects
    }

    /// Connection id of the client this callback belongs to.
    pub fn id(&self) -> usize {
        self.current
    }

    /// Number of connected clients, self included.
    pub fn client_count(&self) -> usize {
        self.registry.client_count()
    }

    /// Send a message to this client. Returns `false` if the client is not
    /// connected or the write failed.
    pub fn send(&mut self, message: &Value) -> bool {
        if !self.current_connected() {
            return false;
        }
        send_message(self.registry, self.drafts, self.current, message)
    }

    /// Send a message to another connected client by id.
    pub fn send_to(&mut self, id: usize, message: &Value) -> bool {
        send_message(self.registry, self.drafts, id, message)
    }

    /// Send a message to every connected client except those in `exclude`.
    /// Only connected clients are broadcast targets, so a sender that is
    /// not yet (or no longer) connected never receives its own broadcast.
    /// Returns `false` if any individual send failed.
    pub fn broadcast(&mut self, message: &Value, exclude: &[usize]) -> bool {
        let mut all_sent = true;
        for id in self.registry.client_ids() {
            if exclude.contains(&id) {
                continue;
            }
            all_sent &= send_message(self.registry, self.drafts, id, message);
        }
        all_sent
    }

    /// Request this client's disconnect. Applied after the current
    /// callback returns; no-op if already disconnected.
    pub fn disconnect(&mut self) {
        if !self.pending_disconnects.contains(&self.current) {
            self.pending_disconnects.push(self.current);
        }
    }

    fn current_connected(&self) -> bool {
        self.registry
            .get(self.current)
            .is_some_and(|conn| conn.has_client())
    }
}

/// Serialize, encode and write one message to one connection. Failures are
/// logged and reported as `false`; writes are fire-and-once.
pub(crate) fn send_message(
    registry: &mut Registry,
    drafts: &[Box<dyn Protocol>],
    id: usize,
    message: &Value,
) -> bool {
    let Some(conn) = registry.get_mut(id) else {
        debug!(id, "send to unknown connection");
        return false;
    };
    let (Some(entry), Some(draft_idx)) = (conn.client.as_ref(), conn.draft) else {
        debug!(id, "send to connection without a client");
        return false;
    };

    let payload = match &entry.serializer {
        Some(serializer) => match serializer.serialize(message) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(id, error = %err, "serialize failed");
                return false;
            }
        },
        None => match message {
            Value::String(text) => text.clone().into_bytes(),
            other => match serde_json::to_vec(other) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(id, error = %err, "serialize failed");
                    return false;
                }
            },
        },
    };

    let frame = drafts[draft_idx].encode(&payload);
    match write_all(&mut conn.stream, &frame) {
        Ok(()) => true,
        Err(err) => {
            warn!(id, error = %err, "write failed");
            false
        }
    }
}
