//! WebSocket draft negotiation, handshakes and frame codecs.
//!
//! Early WebSocket clients speak one of several incompatible wire drafts.
//! Each draft here implements the [`Protocol`] trait: detect whether an
//! upgrade request belongs to it, perform the draft's handshake, and
//! encode/decode its frame format. Draft instances are stateless with
//! respect to any single connection (per-connection data is always passed
//! in as arguments), so one boxed instance per draft serves every socket.
//!
//! Negotiation tries [`default_drafts`] in order and the first `detect`
//! match wins. The order is strictest-first; see [`default_drafts`].

pub mod codec;
pub mod error;
pub mod hixie75;
pub mod hixie76;
pub mod hybi;
pub mod protocol;

pub use error::{ProtocolError, Result};
pub use hixie75::Hixie75;
pub use hixie76::Hixie76;
pub use hybi::Hybi;
pub use protocol::{default_drafts, write_all, Decoded, Endpoints, Protocol};
