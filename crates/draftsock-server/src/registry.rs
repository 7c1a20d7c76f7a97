//! Connection bookkeeping.
//!
//! The registry is the sole owner of socket-to-client bindings. Only the
//! reactor loop mutates it; callbacks reach it through
//! [`ServerContext`](crate::context::ServerContext).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use mio::net::TcpStream;
use tracing::debug;

use crate::client::ClientHandler;
use crate::serializer::Serializer;

/// Per-connection lifecycle state. A closed connection is simply removed
/// from the registry; the listening socket is never a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accepted, no draft handshake completed yet.
    PendingHandshake,
    /// Handshake succeeded; frames flow.
    Open,
}

/// The application side of an open connection.
pub struct ClientEntry {
    /// `None` only while a callback on the handler is in flight.
    pub handler: Option<Box<dyn ClientHandler>>,
    pub serializer: Option<Arc<dyn Serializer>>,
    pub connected: bool,
}

/// One accepted socket and everything bound to it.
pub struct Connection {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    pub state: ConnState,
    /// Index of the owning draft in the server's draft registry.
    pub draft: Option<usize>,
    pub client: Option<ClientEntry>,
}

impl Connection {
    pub fn accepted(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self {
            stream,
            peer_addr,
            state: ConnState::PendingHandshake,
            draft: None,
            client: None,
        }
    }

    /// Whether a connected client is bound to this connection. Holds iff
    /// the connection state is `Open`.
    pub fn has_client(&self) -> bool {
        self.client.as_ref().is_some_and(|entry| entry.connected)
    }
}

/// Maps connection ids to live connections. At most one entry per id.
#[derive(Default)]
pub struct Registry {
    conns: HashMap<usize, Connection>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly accepted connection. An id can only reappear after
    /// the previous holder was removed and its fd closed.
    pub fn insert(&mut self, id: usize, conn: Connection) {
        if self.conns.insert(id, conn).is_some() {
            debug!(id, "registry entry replaced for reused id");
        }
    }

    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        self.conns.remove(&id)
    }

    pub fn get(&self, id: usize) -> Option<&Connection> {
        self.conns.get(&id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.conns.get_mut(&id)
    }

    /// Ids of every connection with a connected client, in no particular
    /// order.
    pub fn client_ids(&self) -> Vec<usize> {
        self.conns
            .iter()
            .filter(|(_, conn)| conn.has_client())
            .map(|(&id, _)| id)
            .collect()
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.conns.values().filter(|conn| conn.has_client()).count()
    }

    /// Number of tracked connections, pending handshakes included.
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}
