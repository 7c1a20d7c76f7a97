//! The application-side contract for a connected endpoint.

use std::net::SocketAddr;

use draftsock_http::ParsedRequest;
use serde_json::Value;

use crate::context::ServerContext;

/// Fixed per-connection facts, built by the core before the application's
/// handler exists. Two-phase construction: the core fixes these fields,
/// then the factory supplies the application object.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Connection id (the accepted socket's fd). Freed on disconnect and
    /// reusable by an unrelated future connection.
    pub id: usize,
    /// Name of the draft that owns this connection.
    pub draft: &'static str,
    /// Remote address of the peer.
    pub peer_addr: SocketAddr,
}

/// Builds the application handler for a newly detected connection.
pub type ClientFactory = Box<dyn FnMut(&ClientInfo) -> Box<dyn ClientHandler> + Send>;

/// Callback surface the reactor invokes on the embedding application.
///
/// Only [`receive`](ClientHandler::receive) is required.
pub trait ClientHandler: Send {
    /// Called before the handshake. Returning `false` aborts the
    /// connection; `on_disconnected` will NOT fire in that case. Sending
    /// to this client is not yet possible.
    fn on_connect(&mut self, request: &ParsedRequest, host: &str, origin: &str) -> bool {
        let _ = (request, host, origin);
        true
    }

    /// Called once the connection is fully established. Sending is now
    /// permitted.
    fn on_connected(&mut self, ctx: &mut ServerContext<'_>) {
        let _ = ctx;
    }

    /// Called once per fully decoded, deserialized application message.
    fn receive(&mut self, ctx: &mut ServerContext<'_>, message: Value);

    /// Called after the client disconnects, from either side. Sending to
    /// others is still permitted; sending to self is not.
    fn on_disconnected(&mut self, ctx: &mut ServerContext<'_>) {
        let _ = ctx;
    }
}
