//! Minimal relay server that forwards every message to the other clients.
//!
//! Run with:
//!   cargo run --example chat-server
//!
//! Then point any WebSocket client (hybi 8/13 or hixie-76) at
//! ws://127.0.0.1:12345 and type away.

use draftsock_server::{
    ClientFactory, ClientHandler, ClientInfo, Server, ServerConfig, ServerContext,
};
use serde_json::Value;

struct Relay {
    id: usize,
}

impl ClientHandler for Relay {
    fn on_connected(&mut self, ctx: &mut ServerContext<'_>) {
        eprintln!("client #{} joined ({} online)", self.id, ctx.client_count());
    }

    fn receive(&mut self, ctx: &mut ServerContext<'_>, message: Value) {
        ctx.broadcast(&message, &[self.id]);
    }

    fn on_disconnected(&mut self, ctx: &mut ServerContext<'_>) {
        eprintln!("client #{} left ({} online)", self.id, ctx.client_count());
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::new("127.0.0.1", 12345).with_serializer_name("json");
    let factory: ClientFactory =
        Box::new(|info: &ClientInfo| -> Box<dyn ClientHandler> { Box::new(Relay { id: info.id }) });

    let mut server = Server::bind(config, factory)?;
    eprintln!("listening on ws://{}", server.local_addr());
    server.run()?;
    Ok(())
}
