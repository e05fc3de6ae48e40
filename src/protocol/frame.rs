//! Frame encoding and decoding for the light protocol.
//!
//! The wire format is a fixed header followed by a one-byte length, a
//! big-endian command id, the payload and a checksum:
//! ```text
//! ┌───────────┬────────┬──────────────┬─────────────┬──────────┐
//! │ 0x55 0xAA │  len   │ command (BE) │   payload   │ checksum │
//! │  2 bytes  │ 1 byte │   2 bytes    │  len bytes  │  1 byte  │
//! └───────────┴────────┴──────────────┴─────────────┴──────────┘
//! ```
//!
//! The checksum is the two's complement of the byte sum of everything
//! between the header and the checksum, so those bytes plus the checksum
//! sum to zero mod 256.

use bytes::{BufMut, Bytes, BytesMut};

/// Frame header bytes.
pub const FRAME_MAGIC: [u8; 2] = [0x55, 0xAA];

/// Maximum payload size (the length field is one byte).
pub const MAX_PAYLOAD_SIZE: usize = 255;

/// Minimum size of a frame the parser will consider.
pub const MIN_FRAME_SIZE: usize = 7;

/// Bytes surrounding the payload: header, length, command id, checksum.
const FRAME_OVERHEAD: usize = 6;

/// Computes the checksum over the length byte, command id and payload.
#[must_use]
pub fn checksum(command_id: u16, payload: &[u8]) -> u8 {
    let [hi, lo] = command_id.to_be_bytes();
    let sum = payload
        .iter()
        .fold((payload.len() as u8).wrapping_add(hi).wrapping_add(lo), |acc, &b| {
            acc.wrapping_add(b)
        });
    sum.wrapping_neg()
}

/// Encodes a command id and payload into a frame.
///
/// # Panics
///
/// Panics if the payload exceeds `MAX_PAYLOAD_SIZE`.
#[must_use]
pub fn encode(command_id: u16, payload: &[u8]) -> Bytes {
    assert!(
        payload.len() <= MAX_PAYLOAD_SIZE,
        "payload exceeds maximum frame size"
    );

    let mut buf = BytesMut::with_capacity(FRAME_OVERHEAD + payload.len());
    buf.put_slice(&FRAME_MAGIC);
    buf.put_u8(payload.len() as u8);
    buf.put_u16(command_id);
    buf.put_slice(payload);
    buf.put_u8(checksum(command_id, payload));
    buf.freeze()
}

/// A validated frame borrowed from a receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub command_id: u16,
    pub payload: &'a [u8],
}

/// Validates and splits a frame.
///
/// Returns `None` when the header does not match, the input is shorter than
/// `MIN_FRAME_SIZE`, the declared length runs past the input, or the
/// checksum does not balance. Trailing bytes after the checksum are ignored.
#[must_use]
pub fn decode(data: &[u8]) -> Option<Frame<'_>> {
    if data.len() < MIN_FRAME_SIZE || data[..2] != FRAME_MAGIC {
        return None;
    }

    let length = usize::from(data[2]);
    let total = FRAME_OVERHEAD + length;
    if data.len() < total {
        return None;
    }

    let command_id = u16::from_be_bytes([data[3], data[4]]);
    let payload = &data[5..5 + length];
    if checksum(command_id, payload) != data[total - 1] {
        return None;
    }

    Some(Frame {
        command_id,
        payload,
    })
}
