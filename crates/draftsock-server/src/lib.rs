//! Single-threaded WebSocket server engine with multi-draft negotiation.
//!
//! One readiness poll multiplexes the listening socket and every client
//! socket; there is no parallelism and no locking. A new connection is
//! parsed, matched against the supported protocol drafts in order,
//! handshaken, and registered; thereafter its frames are decoded by the
//! draft that owns it and delivered to the application's
//! [`ClientHandler`]. The registry is the sole owner of socket-to-client
//! bindings, and at most one decode/dispatch is in flight per connection
//! at any time.
//!
//! Unix-only: a connection is identified by the raw fd of its accepted
//! socket, which doubles as its poll token.

pub mod client;
pub mod context;
pub mod error;
pub mod registry;
pub mod serializer;
pub mod server;

pub use client::{ClientFactory, ClientHandler, ClientInfo};
pub use context::ServerContext;
pub use draftsock_http::ParsedRequest;
pub use error::{Result, ServerError};
pub use serializer::{Serializer, SerializerError};
pub use server::{Server, ServerConfig};
