//! The challenge-response legacy draft (hixie-76).
//!
//! Spoken by Chrome 6, Safari 5.0.1 and the disabled Firefox 4 build. The
//! handshake proves the server read the request by hashing two numbers
//! hidden in challenge-key headers together with an 8-byte body. Frames
//! are delimiter-based: a start marker byte, the raw payload, a NUL
//! terminator. No masking.

use std::io::Write;

use bytes::{BufMut, Bytes, BytesMut};
use draftsock_http::ParsedRequest;
use md5::{Digest, Md5};
use tracing::warn;

use crate::error::{ProtocolError, Result};
use crate::protocol::{write_all, Decoded, Endpoints, Protocol};

/// Challenge-response legacy draft.
pub struct Hixie76;

/// Reduce a challenge-key header to its number: the key's digits,
/// concatenated in order, divided by the number of space characters.
///
/// A key with no digits, no spaces, or a digit string too large to hold is
/// malformed; that is a failure of this draft, not a crash.
pub fn challenge_number(key: &str) -> Option<u32> {
    let mut digits: u64 = 0;
    let mut seen_digit = false;
    for ch in key.chars() {
        if let Some(digit) = ch.to_digit(10) {
            digits = digits.checked_mul(10)?.checked_add(u64::from(digit))?;
            seen_digit = true;
        }
    }
    let spaces = key.chars().filter(|&ch| ch == ' ').count() as u64;
    if !seen_digit || spaces == 0 {
        return None;
    }
    Some((digits / spaces) as u32)
}

/// The 16-byte handshake digest: md5 of both challenge numbers packed
/// big-endian, followed by the 8 raw body bytes.
pub fn challenge_digest(key1: &str, key2: &str, body: &[u8]) -> Option<[u8; 16]> {
    let first = challenge_number(key1)?;
    let second = challenge_number(key2)?;

    let mut md5 = Md5::new();
    md5.update(first.to_be_bytes());
    md5.update(second.to_be_bytes());
    md5.update(body);
    Some(md5.finalize().into())
}

impl Hixie76 {
    fn validate(request: &ParsedRequest) -> bool {
        let headers = &request.headers;
        headers.contains("Sec-Websocket-Key1")
            && headers.contains("Sec-Websocket-Key2")
            && headers.contains("Origin")
            && request.body.len() == 8
    }
}

impl Protocol for Hixie76 {
    fn name(&self) -> &'static str {
        "hixie76"
    }

    fn detect(&self, request: &ParsedRequest) -> Option<Endpoints> {
        if !Self::validate(request) {
            return None;
        }
        let headers = &request.headers;
        Some(Endpoints {
            host: headers.get("Host").unwrap_or_default().to_string(),
            origin: headers.get("Origin").unwrap_or_default().to_string(),
        })
    }

    fn handshake(&self, socket: &mut dyn Write, request: &ParsedRequest) -> Result<()> {
        let headers = &request.headers;
        let origin = headers.get("Origin").unwrap_or_default();
        let host = headers.get("Host").unwrap_or_default();
        let key1 = headers.get("Sec-Websocket-Key1").unwrap_or_default();
        let key2 = headers.get("Sec-Websocket-Key2").unwrap_or_default();

        let digest = challenge_digest(key1, key2, &request.body)
            .ok_or(ProtocolError::MalformedChallenge("digits or spaces missing"))?;

        let mut reply = BytesMut::new();
        reply.put_slice(
            format!(
                "HTTP/1.1 101 WebSocket Protocol Handshake\r\n\
                 Upgrade: WebSocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Origin: {origin}\r\n\
                 Sec-WebSocket-Location: ws://{host}{path}\r\n",
                path = request.path
            )
            .as_bytes(),
        );
        if let Some(subprotocol) = headers.get("Sec-Websocket-Protocol") {
            reply.put_slice(format!("Sec-WebSocket-Protocol: {subprotocol}\r\n").as_bytes());
        }
        reply.put_slice(b"\r\n");
        reply.put_slice(&digest);
        reply.put_u8(0x00);

        write_all(socket, &reply)?;
        Ok(())
    }

    fn disconnect(&self, socket: &mut dyn Write) {
        if let Err(err) = write_all(socket, &[0xFF]) {
            warn!(error = %err, "close byte write failed");
        }
    }

    fn decode(&self, _socket: &mut dyn Write, data: &[u8]) -> Decoded {
        // Frames arrive as a start marker, the payload, a terminator byte.
        // Strip one byte from each end; the interior is the content, no
        // masking in this draft.
        if data.len() < 2 {
            return Decoded::Content(Bytes::new());
        }
        Decoded::Content(Bytes::copy_from_slice(&data[1..data.len() - 1]))
    }

    fn encode(&self, payload: &[u8]) -> Bytes {
        let mut frame = BytesMut::with_capacity(payload.len() + 2);
        frame.put_slice(payload);
        frame.put_u8(0xFF);
        frame.put_u8(0x00);
        frame.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The worked example from the draft-76 document.
    const KEY1: &str = "18x 6]8vM;54 *(5:  {   U1]8  z [  8";
    const KEY2: &str = "1_ tx7X d  <  nw  334J702) 7]o}` 0";
    const BODY: &[u8] = b"Tm[K T2u";

    fn challenge_request() -> ParsedRequest {
        let mut raw = format!(
            "GET /demo HTTP/1.1\r\n\
             Host: example.com\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key2: {KEY2}\r\n\
             Upgrade: WebSocket\r\n\
             Sec-WebSocket-Key1: {KEY1}\r\n\
             Origin: http://example.com\r\n\r\n"
        )
        .into_bytes();
        raw.extend_from_slice(BODY);
        ParsedRequest::parse(&raw)
    }

    #[test]
    fn challenge_numbers_match_documented_vector() {
        assert_eq!(challenge_number(KEY1), Some(155_712_099));
        assert_eq!(challenge_number(KEY2), Some(173_347_027));
    }

    #[test]
    fn challenge_digest_matches_documented_vector() {
        let digest = challenge_digest(KEY1, KEY2, BODY).unwrap();
        assert_eq!(&digest, b"fQJ,fN/4F4!~K~MH");
    }

    #[test]
    fn malformed_keys_fail_without_panicking() {
        assert_eq!(challenge_number("no digits here"), None);
        assert_eq!(challenge_number("123456"), None); // no spaces
        assert_eq!(challenge_number(""), None);
        assert!(challenge_digest("1 1", "no digits", b"12345678").is_none());
    }

    #[test]
    fn detect_requires_both_keys_origin_and_8_byte_body() {
        let endpoints = Hixie76.detect(&challenge_request()).unwrap();
        assert_eq!(endpoints.host, "example.com");
        assert_eq!(endpoints.origin, "http://example.com");

        let missing_key = b"GET / HTTP/1.1\r\n\
            Host: example.com\r\n\
            Sec-WebSocket-Key1: 1 2\r\n\
            Origin: http://example.com\r\n\r\n12345678";
        assert!(Hixie76.detect(&ParsedRequest::parse(missing_key)).is_none());

        let short_body = format!(
            "GET / HTTP/1.1\r\n\
             Sec-WebSocket-Key1: {KEY1}\r\n\
             Sec-WebSocket-Key2: {KEY2}\r\n\
             Origin: http://example.com\r\n\r\nxyz"
        );
        assert!(Hixie76
            .detect(&ParsedRequest::parse(short_body.as_bytes()))
            .is_none());
    }

    #[test]
    fn handshake_writes_upgrade_response_with_digest_and_nul() {
        let request = challenge_request();
        let mut socket = Vec::new();
        Hixie76.handshake(&mut socket, &request).unwrap();

        let head_end = socket
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .unwrap();
        let head = std::str::from_utf8(&socket[..head_end]).unwrap();
        assert!(head.starts_with("HTTP/1.1 101 WebSocket Protocol Handshake\r\n"));
        assert!(head.contains("Upgrade: WebSocket\r\n"));
        assert!(head.contains("Sec-WebSocket-Origin: http://example.com\r\n"));
        assert!(head.contains("Sec-WebSocket-Location: ws://example.com/demo\r\n"));

        let tail = &socket[head_end + 4..];
        assert_eq!(&tail[..16], b"fQJ,fN/4F4!~K~MH");
        assert_eq!(tail[16], 0x00);
        assert_eq!(tail.len(), 17);
    }

    #[test]
    fn handshake_fails_on_malformed_challenge() {
        let raw = b"GET / HTTP/1.1\r\n\
            Host: example.com\r\n\
            Sec-WebSocket-Key1: nodigits\r\n\
            Sec-WebSocket-Key2: 1 2\r\n\
            Origin: http://example.com\r\n\r\n12345678";
        let request = ParsedRequest::parse(raw);

        let mut socket = Vec::new();
        let err = Hixie76.handshake(&mut socket, &request).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedChallenge(_)));
        assert!(socket.is_empty());
    }

    #[test]
    fn decode_strips_one_delimiter_byte_from_each_end() {
        let mut socket = Vec::new();
        let frame = b"\x00chat message\xFF";
        assert_eq!(
            Hixie76.decode(&mut socket, frame),
            Decoded::Content(Bytes::from_static(b"chat message"))
        );
    }

    #[test]
    fn decode_of_tiny_buffer_yields_empty_content() {
        let mut socket = Vec::new();
        assert_eq!(
            Hixie76.decode(&mut socket, b"\x00"),
            Decoded::Content(Bytes::new())
        );
        assert_eq!(
            Hixie76.decode(&mut socket, b""),
            Decoded::Content(Bytes::new())
        );
    }

    #[test]
    fn encode_appends_the_delimiter_byte_pair() {
        let frame = Hixie76.encode(b"hello");
        assert_eq!(frame.as_ref(), b"hello\xFF\x00");
    }

    #[test]
    fn disconnect_writes_the_close_byte() {
        let mut socket = Vec::new();
        Hixie76.disconnect(&mut socket);
        assert_eq!(socket, [0xFF]);
    }
}
