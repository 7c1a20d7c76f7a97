//! The no-payload legacy draft (hixie-75).
//!
//! Chrome 4 and Safari 5.0.0 spoke this draft, but no handshake for it was
//! ever wired up. The entry stays registered so the negotiation order is
//! explicit about where it would sit; it unconditionally declines every
//! connection and produces empty output.

use std::io::Write;

use bytes::Bytes;
use draftsock_http::ParsedRequest;

use crate::error::{ProtocolError, Result};
use crate::protocol::{Decoded, Endpoints, Protocol};

/// Placeholder draft that never negotiates.
pub struct Hixie75;

impl Protocol for Hixie75 {
    fn name(&self) -> &'static str {
        "hixie75"
    }

    fn detect(&self, _request: &ParsedRequest) -> Option<Endpoints> {
        None
    }

    fn handshake(&self, _socket: &mut dyn Write, _request: &ParsedRequest) -> Result<()> {
        Err(ProtocolError::Declined)
    }

    fn disconnect(&self, _socket: &mut dyn Write) {}

    fn decode(&self, _socket: &mut dyn Write, _data: &[u8]) -> Decoded {
        Decoded::Content(Bytes::new())
    }

    fn encode(&self, _payload: &[u8]) -> Bytes {
        Bytes::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declines_even_a_well_formed_modern_request() {
        let raw = b"GET / HTTP/1.1\r\n\
            Host: example.com\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Origin: http://example.com\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 13\r\n\r\n";
        let request = ParsedRequest::parse(raw);

        assert!(Hixie75.detect(&request).is_none());

        let mut socket = Vec::new();
        assert!(matches!(
            Hixie75.handshake(&mut socket, &request),
            Err(ProtocolError::Declined)
        ));
        assert!(socket.is_empty());
    }

    #[test]
    fn produces_empty_output() {
        let mut socket = Vec::new();
        assert_eq!(
            Hixie75.decode(&mut socket, b"anything"),
            Decoded::Content(Bytes::new())
        );
        assert!(Hixie75.encode(b"anything").is_empty());

        Hixie75.disconnect(&mut socket);
        assert!(socket.is_empty());
    }
}
