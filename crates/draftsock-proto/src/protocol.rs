use std::io::{ErrorKind, Write};

use bytes::Bytes;
use draftsock_http::ParsedRequest;

use crate::error::Result;
use crate::{Hixie75, Hixie76, Hybi};

/// Host and origin extracted from a request a draft agreed to own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub host: String,
    pub origin: String,
}

/// Outcome of decoding one inbound buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A payload to deliver to the application.
    Content(Bytes),
    /// A control frame was fully handled; nothing to deliver upward.
    NoContent,
    /// A malformed frame. Log and ignore it; the connection stays open.
    Invalid,
    /// A protocol violation or close signal. Force-disconnect the connection.
    Fatal,
}

/// One WebSocket wire draft.
///
/// Implementations hold no per-connection state; the same instance is
/// shared by every connection that negotiated the draft.
pub trait Protocol: Send + Sync {
    /// Draft name for diagnostics.
    fn name(&self) -> &'static str;

    /// Whether this draft owns the request. Returns the host/origin pair
    /// only if every header the draft requires is present and well-formed.
    /// Never touches the socket.
    fn detect(&self, request: &ParsedRequest) -> Option<Endpoints>;

    /// Write the draft's upgrade response. An error is fatal for the
    /// connection; the caller must close it.
    fn handshake(&self, socket: &mut dyn Write, request: &ParsedRequest) -> Result<()>;

    /// Write the draft's close indicator, best-effort. Write failures are
    /// logged, not raised.
    fn disconnect(&self, socket: &mut dyn Write);

    /// Decode one inbound buffer. `socket` is available for immediate
    /// control-frame replies (pong).
    fn decode(&self, socket: &mut dyn Write, data: &[u8]) -> Decoded;

    /// Wrap an outbound payload in the draft's frame format.
    fn encode(&self, payload: &[u8]) -> Bytes;
}

/// All supported drafts in negotiation order.
///
/// Strictest detector first: the binary-framing draft requires its key and
/// version headers, the challenge-response legacy draft has looser criteria
/// and must only be consulted after it, and the no-payload placeholder
/// (which never matches) comes last. First `detect` match wins.
pub fn default_drafts() -> Vec<Box<dyn Protocol>> {
    vec![Box::new(Hybi), Box::new(Hixie76), Box::new(Hixie75)]
}

/// Write a whole buffer to the socket, retrying interrupted and would-block
/// writes. Used for handshake responses, control replies and data frames
/// alike; a single write is assumed to complete quickly.
pub fn write_all(socket: &mut dyn Write, bytes: &[u8]) -> std::io::Result<()> {
    let mut offset = 0usize;
    while offset < bytes.len() {
        match socket.write(&bytes[offset..]) {
            Ok(0) => return Err(std::io::Error::from(ErrorKind::WriteZero)),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) => return Err(err),
        }
    }
    loop {
        match socket.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drafts_are_registered_strictest_first() {
        let drafts = default_drafts();
        let names: Vec<&str> = drafts.iter().map(|draft| draft.name()).collect();
        assert_eq!(names, ["hybi", "hixie76", "hixie75"]);
    }

    #[test]
    fn first_matching_draft_wins() {
        let raw = b"GET /app HTTP/1.1\r\n\
            Host: localhost:9000\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Origin: http://localhost\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 13\r\n\r\n";
        let request = ParsedRequest::parse(raw);

        let drafts = default_drafts();
        let winner = drafts.iter().find(|draft| draft.detect(&request).is_some());
        assert_eq!(winner.map(|draft| draft.name()), Some("hybi"));
    }

    #[test]
    fn no_draft_matches_a_plain_http_request() {
        let raw = b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let request = ParsedRequest::parse(raw);

        let drafts = default_drafts();
        assert!(drafts.iter().all(|draft| draft.detect(&request).is_none()));
    }

    #[test]
    fn write_all_retries_interrupted_writes() {
        struct InterruptedOnce {
            hit: bool,
            data: Vec<u8>,
        }
        impl Write for InterruptedOnce {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                if !self.hit {
                    self.hit = true;
                    return Err(std::io::Error::from(ErrorKind::Interrupted));
                }
                self.data.extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut sink = InterruptedOnce {
            hit: false,
            data: Vec::new(),
        };
        write_all(&mut sink, b"frame").unwrap();
        assert_eq!(sink.data, b"frame");
    }

    #[test]
    fn write_all_reports_closed_sink() {
        struct ZeroWriter;
        impl Write for ZeroWriter {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let err = write_all(&mut ZeroWriter, b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteZero);
    }
}
