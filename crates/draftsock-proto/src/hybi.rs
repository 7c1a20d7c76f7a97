//! The binary-framing draft (protocol versions 8 and 13).
//!
//! Covers HyBi draft 10 through RFC-era clients: IE 10, Firefox 7+,
//! Chrome 14+. Fragmented (multi-frame) messages are a known gap: a
//! non-final frame is rejected as invalid rather than reassembled.

use std::io::Write;

use base64::prelude::*;
use bytes::Bytes;
use draftsock_http::ParsedRequest;
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::codec::{
    apply_mask, encode_frame, parse_header, parse_length, OP_CLOSE, OP_CONTINUATION, OP_PING,
    OP_PONG, OP_TEXT,
};
use crate::error::Result;
use crate::protocol::{write_all, Decoded, Endpoints, Protocol};

/// The GUID magic string defined by the protocol specification.
const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Binary-framing draft, versions 8 and 13.
pub struct Hybi;

/// `base64(sha1(key + GUID))`, the `Sec-WebSocket-Accept` value.
pub fn accept_key(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.as_bytes());
    sha.update(GUID.as_bytes());
    BASE64_STANDARD.encode(sha.finalize())
}

impl Hybi {
    fn validate(request: &ParsedRequest) -> bool {
        let headers = &request.headers;
        let version_supported = headers
            .get("Sec-Websocket-Version")
            .and_then(|value| value.trim().parse::<u32>().ok())
            .is_some_and(|version| version == 8 || version == 13);

        headers.contains("Sec-Websocket-Key")
            && (headers.contains("Sec-Websocket-Origin") || headers.contains("Origin"))
            && version_supported
    }

    /// The origin header spelling the client used, canonicalized. The
    /// handshake echoes the origin back under the same name.
    fn origin_key(request: &ParsedRequest) -> &'static str {
        if request.headers.contains("Sec-Websocket-Origin") {
            "Sec-Websocket-Origin"
        } else {
            "Origin"
        }
    }
}

impl Protocol for Hybi {
    fn name(&self) -> &'static str {
        "hybi"
    }

    fn detect(&self, request: &ParsedRequest) -> Option<Endpoints> {
        if !Self::validate(request) {
            return None;
        }
        let headers = &request.headers;
        Some(Endpoints {
            host: headers.get("Host").unwrap_or_default().to_string(),
            origin: headers
                .get(Self::origin_key(request))
                .unwrap_or_default()
                .to_string(),
        })
    }

    fn handshake(&self, socket: &mut dyn Write, request: &ParsedRequest) -> Result<()> {
        let headers = &request.headers;
        let origin_key = Self::origin_key(request);
        let origin = headers.get(origin_key).unwrap_or_default();
        let version = headers.get("Sec-Websocket-Version").unwrap_or_default();
        let key = headers.get("Sec-Websocket-Key").unwrap_or_default();
        let hash = accept_key(key);

        let mut reply = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Version: {version}\r\n\
             {origin_key}: {origin}\r\n"
        );
        if let Some(subprotocol) = headers.get("Sec-Websocket-Protocol") {
            reply.push_str(&format!("Sec-WebSocket-Protocol: {subprotocol}\r\n"));
        }
        reply.push_str(&format!("Sec-WebSocket-Accept: {hash}\r\n\r\n"));

        write_all(socket, reply.as_bytes())?;
        Ok(())
    }

    fn disconnect(&self, socket: &mut dyn Write) {
        // Close frame: final bit + close opcode, zero payload length.
        if let Err(err) = write_all(socket, &[0x88, 0x00]) {
            warn!(error = %err, "close frame write failed");
        }
    }

    fn decode(&self, socket: &mut dyn Write, data: &[u8]) -> Decoded {
        let Some(header) = parse_header(data) else {
            warn!("frame shorter than its fixed header");
            return Decoded::Invalid;
        };

        // No support for multi-frame messages.
        if !header.fin {
            warn!("non-final frame received; fragmentation is unsupported");
            return Decoded::Invalid;
        }

        // The specification insists that all client frames are masked.
        if !header.masked {
            warn!("unmasked frame received");
            return Decoded::Fatal;
        }

        if header.opcode == OP_CONTINUATION {
            warn!("continuation opcode without a preceding frame");
            return Decoded::Invalid;
        }

        if header.opcode == OP_CLOSE {
            return Decoded::Fatal;
        }

        let Some((declared, offset)) = parse_length(data, header.len_field) else {
            warn!("frame truncated inside its length field");
            return Decoded::Invalid;
        };
        if data.len() < offset + 4 {
            warn!("frame truncated inside its mask key");
            return Decoded::Invalid;
        }
        let key: [u8; 4] = data[offset..offset + 4].try_into().unwrap();
        let mut content = data[offset + 4..].to_vec();

        if declared != content.len() {
            warn!(
                declared,
                actual = content.len(),
                "size mismatch between header and content"
            );
            return Decoded::Invalid;
        }

        apply_mask(&mut content, key);

        if header.opcode == OP_PING {
            debug!(len = content.len(), "ping; replying with pong");
            let pong = encode_frame(OP_PONG, &content);
            if let Err(err) = write_all(socket, &pong) {
                warn!(error = %err, "pong write failed");
            }
            return Decoded::NoContent;
        }

        Decoded::Content(Bytes::from(content))
    }

    fn encode(&self, payload: &[u8]) -> Bytes {
        encode_frame(OP_TEXT, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_request(version: &str) -> ParsedRequest {
        let raw = format!(
            "GET /demo HTTP/1.1\r\n\
             Host: example.com\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Origin: http://example.com\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: {version}\r\n\r\n"
        );
        ParsedRequest::parse(raw.as_bytes())
    }

    /// Build a client-style frame: masked, with the minimal length form.
    fn client_frame(opcode: u8, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
        let mut frame = vec![0x80 | opcode];
        if payload.len() < 126 {
            frame.push(0x80 | payload.len() as u8);
        } else if payload.len() <= 0xFFFF {
            frame.push(0x80 | 126);
            frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        } else {
            frame.push(0x80 | 127);
            frame.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        }
        frame.extend_from_slice(&key);
        let mut masked = payload.to_vec();
        apply_mask(&mut masked, key);
        frame.extend_from_slice(&masked);
        frame
    }

    #[test]
    fn detect_accepts_versions_8_and_13() {
        assert!(Hybi.detect(&upgrade_request("13")).is_some());
        assert!(Hybi.detect(&upgrade_request("8")).is_some());
        assert!(Hybi.detect(&upgrade_request("7")).is_none());
        assert!(Hybi.detect(&upgrade_request("14")).is_none());
        assert!(Hybi.detect(&upgrade_request("not-a-number")).is_none());
    }

    #[test]
    fn detect_returns_host_and_origin() {
        let endpoints = Hybi.detect(&upgrade_request("13")).unwrap();
        assert_eq!(endpoints.host, "example.com");
        assert_eq!(endpoints.origin, "http://example.com");
    }

    #[test]
    fn detect_requires_key_header() {
        let raw = b"GET / HTTP/1.1\r\n\
            Host: example.com\r\n\
            Origin: http://example.com\r\n\
            Sec-WebSocket-Version: 13\r\n\r\n";
        assert!(Hybi.detect(&ParsedRequest::parse(raw)).is_none());
    }

    #[test]
    fn accept_key_matches_documented_vector() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn handshake_writes_switching_protocols_response() {
        let request = upgrade_request("13");
        let mut socket = Vec::new();
        Hybi.handshake(&mut socket, &request).unwrap();

        let reply = String::from_utf8(socket).unwrap();
        assert!(reply.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(reply.contains("Upgrade: websocket\r\n"));
        assert!(reply.contains("Connection: Upgrade\r\n"));
        assert!(reply.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(reply.contains("Origin: http://example.com\r\n"));
        assert!(reply.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(reply.ends_with("\r\n\r\n"));
    }

    #[test]
    fn handshake_echoes_sec_websocket_origin_spelling() {
        let raw = b"GET / HTTP/1.1\r\n\
            Host: example.com\r\n\
            Sec-WebSocket-Origin: http://example.com\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 8\r\n\r\n";
        let request = ParsedRequest::parse(raw);

        let mut socket = Vec::new();
        Hybi.handshake(&mut socket, &request).unwrap();

        let reply = String::from_utf8(socket).unwrap();
        assert!(reply.contains("Sec-Websocket-Origin: http://example.com\r\n"));
        assert!(!reply.contains("\r\nOrigin:"));
    }

    #[test]
    fn handshake_echoes_subprotocol_when_offered() {
        let raw = b"GET / HTTP/1.1\r\n\
            Host: example.com\r\n\
            Origin: http://example.com\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 13\r\n\
            Sec-WebSocket-Protocol: chat\r\n\r\n";
        let request = ParsedRequest::parse(raw);

        let mut socket = Vec::new();
        Hybi.handshake(&mut socket, &request).unwrap();

        let reply = String::from_utf8(socket).unwrap();
        assert!(reply.contains("Sec-WebSocket-Protocol: chat\r\n"));
    }

    #[test]
    fn masked_frame_decodes_to_content() {
        let key = [0x11, 0x22, 0x33, 0x44];
        let frame = client_frame(OP_TEXT, b"hello draftsock", key);

        let mut socket = Vec::new();
        let decoded = Hybi.decode(&mut socket, &frame);
        assert_eq!(
            decoded,
            Decoded::Content(Bytes::from_static(b"hello draftsock"))
        );
        assert!(socket.is_empty());
    }

    #[test]
    fn encoded_output_survives_a_masked_round_trip() {
        let payloads: [&[u8]; 3] = [b"", b"short", &[0x7E; 300]];
        for payload in payloads {
            let server_frame = Hybi.encode(payload);
            let header = parse_header(&server_frame).unwrap();
            let (len, offset) = parse_length(&server_frame, header.len_field).unwrap();
            assert_eq!(len, payload.len());

            // Re-wrap the encoded payload as a masked client frame.
            let frame = client_frame(OP_TEXT, &server_frame[offset..], [0xDE, 0xAD, 0xBE, 0xEF]);
            let mut socket = Vec::new();
            match Hybi.decode(&mut socket, &frame) {
                Decoded::Content(content) => assert_eq!(content.as_ref(), payload),
                other => panic!("expected content, got {other:?}"),
            }
        }
    }

    #[test]
    fn unmasked_frame_is_fatal() {
        let mut frame = vec![0x81, 0x05];
        frame.extend_from_slice(b"hello");

        let mut socket = Vec::new();
        assert_eq!(Hybi.decode(&mut socket, &frame), Decoded::Fatal);
    }

    #[test]
    fn close_frame_is_fatal() {
        let frame = client_frame(OP_CLOSE, b"", [1, 2, 3, 4]);
        let mut socket = Vec::new();
        assert_eq!(Hybi.decode(&mut socket, &frame), Decoded::Fatal);
    }

    #[test]
    fn non_final_frame_is_invalid() {
        let key = [9, 9, 9, 9];
        let mut frame = client_frame(OP_TEXT, b"part", key);
        frame[0] &= 0x7F; // clear FIN

        let mut socket = Vec::new();
        assert_eq!(Hybi.decode(&mut socket, &frame), Decoded::Invalid);
    }

    #[test]
    fn continuation_opcode_is_invalid() {
        let frame = client_frame(OP_CONTINUATION, b"tail", [1, 2, 3, 4]);
        let mut socket = Vec::new();
        assert_eq!(Hybi.decode(&mut socket, &frame), Decoded::Invalid);
    }

    #[test]
    fn length_mismatch_is_invalid() {
        let key = [5, 6, 7, 8];
        let mut frame = client_frame(OP_TEXT, b"abcdef", key);
        frame[1] = 0x80 | 3; // declare 3 bytes, carry 6

        let mut socket = Vec::new();
        assert_eq!(Hybi.decode(&mut socket, &frame), Decoded::Invalid);
    }

    #[test]
    fn ping_triggers_one_pong_and_no_content() {
        let key = [0xA0, 0xB1, 0xC2, 0xD3];
        let frame = client_frame(OP_PING, b"are you there", key);

        let mut socket = Vec::new();
        assert_eq!(Hybi.decode(&mut socket, &frame), Decoded::NoContent);

        // Exactly one pong, unmasked, same payload.
        let header = parse_header(&socket).unwrap();
        assert!(header.fin);
        assert_eq!(header.opcode, OP_PONG);
        assert!(!header.masked);
        let (len, offset) = parse_length(&socket, header.len_field).unwrap();
        assert_eq!(len, 13);
        assert_eq!(&socket[offset..], b"are you there");
        assert_eq!(socket.len(), offset + 13);
    }

    #[test]
    fn truncated_buffer_is_invalid() {
        let mut socket = Vec::new();
        assert_eq!(Hybi.decode(&mut socket, &[0x81]), Decoded::Invalid);
        // Declares a 16-bit length but ends inside the length field.
        assert_eq!(
            Hybi.decode(&mut socket, &[0x81, 0x80 | 126, 0x00]),
            Decoded::Invalid
        );
    }

    #[test]
    fn disconnect_writes_a_close_frame() {
        let mut socket = Vec::new();
        Hybi.disconnect(&mut socket);
        assert_eq!(socket, [0x88, 0x00]);
    }
}
