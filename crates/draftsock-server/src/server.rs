//! The reactor loop: one readiness poll over the listening socket and
//! every accepted socket, dispatching accepts, handshakes and frames.

use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use draftsock_http::ParsedRequest;
use draftsock_proto::{default_drafts, Decoded, Protocol};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::client::{ClientFactory, ClientHandler, ClientInfo};
use crate::context::ServerContext;
use crate::error::{Result, ServerError};
use crate::registry::{ClientEntry, ConnState, Connection, Registry};
use crate::serializer::{by_name, Serializer};

/// Token reserved for the listening socket. Connection tokens are fd
/// values and can never reach this.
const LISTENER: Token = Token(usize::MAX);

const READ_CHUNK_SIZE: usize = 8 * 1024;
const EVENT_CAPACITY: usize = 128;

enum SerializerChoice {
    Named(String),
    Instance(Arc<dyn Serializer>),
}

/// Server construction parameters.
///
/// ```no_run
/// use draftsock_server::{Server, ServerConfig};
/// # use draftsock_server::{ClientHandler, ServerContext};
/// # struct Echo;
/// # impl ClientHandler for Echo {
/// #     fn receive(&mut self, ctx: &mut ServerContext<'_>, msg: serde_json::Value) {
/// #         ctx.send(&msg);
/// #     }
/// # }
/// let config = ServerConfig::new("127.0.0.1", 12345).with_serializer_name("json");
/// let factory = Box::new(|_info: &draftsock_server::ClientInfo| -> Box<dyn ClientHandler> {
///     Box::new(Echo)
/// });
/// let mut server = Server::bind(config, factory)?;
/// server.run()?;
/// # Ok::<(), draftsock_server::ServerError>(())
/// ```
pub struct ServerConfig {
    host: String,
    port: u16,
    serializer: Option<SerializerChoice>,
    artifact_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            serializer: None,
            artifact_path: None,
        }
    }

    /// Select a built-in serializer by short name (`json`, `text`).
    pub fn with_serializer_name(mut self, name: impl Into<String>) -> Self {
        self.serializer = Some(SerializerChoice::Named(name.into()));
        self
    }

    /// Use the given serializer instance for every client.
    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(SerializerChoice::Instance(serializer));
        self
    }

    /// Write `ws://<addr>` to this path on startup so demo tooling can
    /// discover the server. Best-effort; a failed write is logged.
    pub fn with_artifact_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_path = Some(path.into());
        self
    }
}

/// The WebSocket server: listening socket, draft registry, connection
/// registry and the readiness loop that ties them together.
pub struct Server {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    drafts: Vec<Box<dyn Protocol>>,
    registry: Registry,
    serializer: Option<Arc<dyn Serializer>>,
    factory: ClientFactory,
}

impl Server {
    /// Create the listening socket and the readiness poll. Startup is not
    /// expected to degrade gracefully: any failure here aborts.
    pub fn bind(config: ServerConfig, factory: ClientFactory) -> Result<Self> {
        let serializer = match config.serializer {
            Some(SerializerChoice::Named(name)) => {
                Some(by_name(&name).ok_or(ServerError::UnknownSerializer(name))?)
            }
            Some(SerializerChoice::Instance(instance)) => Some(instance),
            None => None,
        };

        let addr_spec = format!("{}:{}", config.host, config.port);
        let addr = addr_spec
            .to_socket_addrs()
            .map_err(|source| ServerError::Bind {
                addr: addr_spec.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| ServerError::Bind {
                addr: addr_spec.clone(),
                source: std::io::Error::new(ErrorKind::InvalidInput, "address resolved to nothing"),
            })?;

        let mut listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind {
            addr: addr_spec.clone(),
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: addr_spec,
            source,
        })?;

        let poll = Poll::new().map_err(ServerError::Poll)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(ServerError::Poll)?;

        if let Some(path) = &config.artifact_path {
            match std::fs::write(path, format!("ws://{local_addr}")) {
                Ok(()) => debug!(?path, "wrote discovery artifact"),
                Err(err) => warn!(?path, error = %err, "discovery artifact write failed"),
            }
        }

        let drafts = default_drafts();
        info!(%local_addr, drafts = drafts.len(), "server started");

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            listener,
            local_addr,
            drafts,
            registry: Registry::new(),
            serializer,
            factory,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.registry.client_count()
    }

    /// Run the reactor forever. Only transport-fatal errors return.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.run_once(None)?;
        }
    }

    /// Wait for readiness at most `timeout` (forever if `None`) and
    /// process every ready socket once. Failures while handling any single
    /// connection are logged and never abort the loop.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> Result<()> {
        if let Err(err) = self.poll.poll(&mut self.events, timeout) {
            if err.kind() == ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(ServerError::Poll(err));
        }

        let ready: Vec<Token> = self.events.iter().map(|event| event.token()).collect();
        for token in ready {
            if token == LISTENER {
                self.accept_ready()?;
            } else {
                self.socket_ready(token.0);
            }
        }
        Ok(())
    }

    /// Accept every pending connection and track it as a handshake
    /// candidate.
    fn accept_ready(&mut self) -> Result<()> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer_addr)) => {
                    let id = stream.as_raw_fd() as usize;
                    self.poll
                        .registry()
                        .register(&mut stream, Token(id), Interest::READABLE)
                        .map_err(ServerError::Poll)?;
                    info!(id, peer = %peer_addr, "new connection");
                    self.registry.insert(id, Connection::accepted(stream, peer_addr));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(ServerError::Accept(err)),
            }
        }
    }

    /// Handle readiness on one accepted socket.
    fn socket_ready(&mut self, id: usize) {
        let Some(conn) = self.registry.get_mut(id) else {
            // Closed earlier in this same poll round.
            return;
        };
        let (buf, closed) = drain_stream(&mut conn.stream, id);

        if !buf.is_empty() {
            let open = conn.state == ConnState::Open;
            if open {
                self.dispatch_frame(id, &buf);
            } else {
                self.negotiate(id, &buf);
            }
        }

        if closed {
            // Orderly close or read failure: full disconnect for a
            // registered client, plain close otherwise.
            if self.registry.get(id).is_some_and(Connection::has_client) {
                self.disconnect_client(id);
            } else {
                self.close_socket(id);
            }
        }
    }

    /// Decode one inbound buffer for an open connection and branch on the
    /// outcome.
    fn dispatch_frame(&mut self, id: usize, buf: &[u8]) {
        let decoded = {
            let Some(conn) = self.registry.get_mut(id) else {
                return;
            };
            let Some(draft_idx) = conn.draft else {
                warn!(id, "open connection without a draft");
                return;
            };
            self.drafts[draft_idx].decode(&mut conn.stream, buf)
        };

        match decoded {
            Decoded::NoContent => {}
            Decoded::Invalid => warn!(id, "invalid frame ignored"),
            Decoded::Fatal => {
                debug!(id, "fatal frame; disconnecting");
                self.disconnect_client(id);
            }
            Decoded::Content(content) => self.deliver(id, &content),
        }
    }

    /// Deserialize a decoded payload and hand it to the client handler.
    fn deliver(&mut self, id: usize, content: &[u8]) {
        let message = {
            let Some(entry) = self.registry.get(id).and_then(|conn| conn.client.as_ref()) else {
                return;
            };
            match &entry.serializer {
                Some(serializer) => match serializer.deserialize(content) {
                    Ok(value) => value,
                    Err(err) => {
                        warn!(id, error = %err, "undeserializable payload dropped");
                        return;
                    }
                },
                None => Value::String(String::from_utf8_lossy(content).into_owned()),
            }
        };

        debug!(id, len = content.len(), "message received");
        self.with_handler(id, |handler, ctx| handler.receive(ctx, message));
    }

    /// Parse an upgrade request on a not-yet-registered socket, negotiate
    /// a draft and, if everything agrees, promote the connection to open.
    fn negotiate(&mut self, id: usize, raw: &[u8]) {
        let request = ParsedRequest::parse(raw);

        if !is_upgrade_request(&request) {
            error!(id, path = %request.path, "invalid connection request");
            self.close_socket(id);
            return;
        }

        // First matching draft wins; the registration order guarantees
        // stricter detectors are consulted first.
        let Some((draft_idx, endpoints)) = self
            .drafts
            .iter()
            .enumerate()
            .find_map(|(idx, draft)| draft.detect(&request).map(|endpoints| (idx, endpoints)))
        else {
            error!(id, "no draft found to handle the connection");
            self.close_socket(id);
            return;
        };
        let draft_name = self.drafts[draft_idx].name();

        let Some(peer_addr) = self.registry.get(id).map(|conn| conn.peer_addr) else {
            return;
        };
        let info = ClientInfo {
            id,
            draft: draft_name,
            peer_addr,
        };
        let mut handler = (self.factory)(&info);

        if !handler.on_connect(&request, &endpoints.host, &endpoints.origin) {
            debug!(id, draft = draft_name, "connection vetoed by application");
            self.close_with_draft(id, draft_idx);
            return;
        }

        let handshake = {
            let Some(conn) = self.registry.get_mut(id) else {
                return;
            };
            self.drafts[draft_idx].handshake(&mut conn.stream, &request)
        };
        if let Err(err) = handshake {
            error!(id, draft = draft_name, error = %err, "handshake failed");
            self.close_with_draft(id, draft_idx);
            return;
        }

        let Some(conn) = self.registry.get_mut(id) else {
            return;
        };
        conn.state = ConnState::Open;
        conn.draft = Some(draft_idx);
        conn.client = Some(ClientEntry {
            handler: Some(handler),
            serializer: self.serializer.clone(),
            connected: true,
        });
        info!(id, draft = draft_name, "client connected");

        self.with_handler(id, |handler, ctx| handler.on_connected(ctx));
    }

    /// Take the handler out of its entry, run one callback against a
    /// context over the rest of the registry, put the handler back, then
    /// apply any disconnects the callback requested.
    fn with_handler<F>(&mut self, id: usize, callback: F)
    where
        F: FnOnce(&mut Box<dyn ClientHandler>, &mut ServerContext<'_>),
    {
        let Some(mut handler) = self
            .registry
            .get_mut(id)
            .and_then(|conn| conn.client.as_mut())
            .and_then(|entry| entry.handler.take())
        else {
            return;
        };

        let mut ctx = ServerContext::new(&mut self.registry, &self.drafts, id);
        callback(&mut handler, &mut ctx);
        let pending = ctx.into_pending_disconnects();

        if let Some(entry) = self
            .registry
            .get_mut(id)
            .and_then(|conn| conn.client.as_mut())
        {
            entry.handler = Some(handler);
        }

        for target in pending {
            self.disconnect_client(target);
        }
    }

    /// Full disconnect of a registered client: unregister, write the
    /// draft's close indicator, close the transport, notify the handler.
    fn disconnect_client(&mut self, id: usize) {
        let Some(mut conn) = self.registry.remove(id) else {
            return;
        };
        let Some(mut entry) = conn.client.take() else {
            self.drop_stream(&mut conn);
            info!(id, "connection closed");
            return;
        };

        entry.connected = false;
        if let Some(draft_idx) = conn.draft {
            self.drafts[draft_idx].disconnect(&mut conn.stream);
        }
        self.drop_stream(&mut conn);
        info!(id, "client disconnected");

        if let Some(mut handler) = entry.handler.take() {
            let mut ctx = ServerContext::new(&mut self.registry, &self.drafts, id);
            handler.on_disconnected(&mut ctx);
            let pending = ctx.into_pending_disconnects();
            for target in pending {
                self.disconnect_client(target);
            }
        }
    }

    /// Close a socket that never reached open: no client callbacks fire.
    fn close_socket(&mut self, id: usize) {
        if let Some(mut conn) = self.registry.remove(id) {
            self.drop_stream(&mut conn);
            info!(id, "connection closed");
        }
    }

    /// Close after a failed negotiation, writing the draft's close
    /// indicator first.
    fn close_with_draft(&mut self, id: usize, draft_idx: usize) {
        if let Some(conn) = self.registry.get_mut(id) {
            self.drafts[draft_idx].disconnect(&mut conn.stream);
        }
        self.close_socket(id);
    }

    fn drop_stream(&mut self, conn: &mut Connection) {
        if let Err(err) = self.poll.registry().deregister(&mut conn.stream) {
            debug!(error = %err, "deregister failed");
        }
    }
}

/// Read everything currently available on the stream. Returns the bytes
/// and whether the connection is finished (orderly close or read failure).
fn drain_stream(stream: &mut mio::net::TcpStream, id: usize) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return (buf, true),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == ErrorKind::WouldBlock => return (buf, false),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(id, error = %err, "read failed");
                return (buf, true);
            }
        }
    }
}

/// A proper WebSocket connection request carries `Upgrade: websocket` and
/// an Upgrade token in its `Connection` header.
fn is_upgrade_request(request: &ParsedRequest) -> bool {
    let upgrade = request
        .headers
        .get("Upgrade")
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"));
    let connection = request
        .headers
        .get("Connection")
        .is_some_and(|value| value.split(',').any(|token| token.trim() == "Upgrade"));
    upgrade && connection
}
