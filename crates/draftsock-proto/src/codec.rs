use bytes::{BufMut, Bytes, BytesMut};

/// Continuation frame (unsupported, see [`crate::hybi`]).
pub const OP_CONTINUATION: u8 = 0x0;
/// Text frame.
pub const OP_TEXT: u8 = 0x1;
/// Connection close.
pub const OP_CLOSE: u8 = 0x8;
/// Ping.
pub const OP_PING: u8 = 0x9;
/// Pong.
pub const OP_PONG: u8 = 0xA;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;

/// The first two bytes of a binary frame.
///
/// Wire format (big-endian bit numbering):
/// ```text
/// ┌─────┬──────────┬──────┬──────────┬────────────────┬──────────┬─────────┐
/// │ FIN │ opcode   │ MASK │ len      │ ext. length    │ mask key │ payload │
/// │ 1b  │ 4b       │ 1b   │ 7b       │ 0, 2 or 8 B    │ 0 or 4 B │ len B   │
/// └─────┴──────────┴──────┴──────────┴────────────────┴──────────┴─────────┘
/// ```
/// `len < 126` is the payload length itself; `len == 126` selects a 16-bit
/// extended length; `len == 127` selects a 64-bit extended length of which
/// only the low 32 bits are honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: u8,
    pub masked: bool,
    pub len_field: u8,
}

/// Parse the fixed two-byte header. `None` if the buffer is too short.
pub fn parse_header(data: &[u8]) -> Option<FrameHeader> {
    if data.len() < 2 {
        return None;
    }
    Some(FrameHeader {
        fin: data[0] & FIN_BIT != 0,
        opcode: data[0] & 0x0F,
        masked: data[1] & MASK_BIT != 0,
        len_field: data[1] & 0x7F,
    })
}

/// Resolve the declared payload length and the offset of the first byte
/// after the length field. `None` if the buffer is too short to hold the
/// extended length the header selects.
pub fn parse_length(data: &[u8], len_field: u8) -> Option<(usize, usize)> {
    match len_field {
        126 => {
            if data.len() < 4 {
                return None;
            }
            let size = u16::from_be_bytes(data[2..4].try_into().unwrap());
            Some((size as usize, 4))
        }
        127 => {
            // Only the low 32 bits of the 64-bit field are honored; the
            // high word is assumed zero.
            if data.len() < 10 {
                return None;
            }
            let size = u32::from_be_bytes(data[6..10].try_into().unwrap());
            Some((size as usize, 10))
        }
        direct => Some((direct as usize, 2)),
    }
}

/// XOR a payload against a 4-byte mask key, in place. Masking is an
/// involution: applying the same key twice reproduces the input.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Assemble a final, unmasked frame with the minimal length encoding.
/// Server-to-client frames are never masked.
pub fn encode_frame(opcode: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 10);
    buf.put_u8(FIN_BIT | (opcode & 0x0F));
    if payload.len() < 126 {
        buf.put_u8(payload.len() as u8);
    } else if payload.len() <= 0xFFFF {
        buf.put_u8(126);
        buf.put_u16(payload.len() as u16);
    } else {
        buf.put_u8(127);
        buf.put_u64(payload.len() as u64);
    }
    buf.put_slice(payload);
    buf.freeze()
}
