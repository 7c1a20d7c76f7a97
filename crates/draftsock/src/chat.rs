//! The bundled chat application.
//!
//! Each connected browser is a chatter. A message carrying a `name` field
//! renames the chatter; a message carrying a `message` field is relayed to
//! every other chatter tagged with the sender's name and id.

use draftsock_server::{ClientHandler, ServerContext};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// A relayed chat line as the clients see it.
#[derive(Debug, Serialize)]
struct ChatLine<'a> {
    user: &'a str,
    id: usize,
    message: &'a str,
}

pub struct Chatter {
    id: usize,
    name: String,
}

impl Chatter {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            name: "User".to_string(),
        }
    }
}

impl ClientHandler for Chatter {
    fn on_connected(&mut self, ctx: &mut ServerContext<'_>) {
        info!(id = self.id, chatters = ctx.client_count(), "chatter joined");
    }

    fn receive(&mut self, ctx: &mut ServerContext<'_>, message: Value) {
        if let Some(name) = message.get("name").and_then(Value::as_str) {
            self.name = name.to_string();
            return;
        }

        let Some(text) = message.get("message").and_then(Value::as_str) else {
            return;
        };

        let line = ChatLine {
            user: &self.name,
            id: self.id,
            message: text,
        };
        match serde_json::to_value(&line) {
            // Relay to everyone except the sender.
            Ok(value) => {
                ctx.broadcast(&value, &[self.id]);
            }
            Err(err) => warn!(id = self.id, error = %err, "chat line serialization failed"),
        }
    }

    fn on_disconnected(&mut self, ctx: &mut ServerContext<'_>) {
        info!(id = self.id, chatters = ctx.client_count(), "chatter left");
    }
}
