//! Varint and field-tag primitives for the Twirp streaming wire format.
//!
//! Stream frames are protobuf-shaped: a varint field tag, a varint length,
//! then the payload. Only two tags are valid on a response stream:
//! [`MESSAGE_TAG`] (field 1, length-delimited) and [`TRAILER_TAG`]
//! (field 2, length-delimited).

/// Field tag of a message frame: `(1 << 3) | 2`.
pub const MESSAGE_TAG: u64 = (1 << 3) | 2;

/// Field tag of the trailer frame: `(2 << 3) | 2`.
pub const TRAILER_TAG: u64 = (2 << 3) | 2;

/// Wire type for length-delimited fields.
pub const WIRE_TYPE_LEN: u64 = 2;

/// Longest legal encoding of a u64 varint.
const MAX_VARINT_LEN: usize = 10;

/// Error for a varint that cannot terminate.
///
/// Ten continuation bytes without a terminator cannot be a valid u64,
/// so this is a structural failure rather than a need for more data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("varint exceeds 10 bytes")]
pub struct VarintOverflow;

/// Decode a little-endian base-128 varint starting at `offset`.
///
/// Returns `Ok(Some((value, bytes_consumed)))` on success and `Ok(None)`
/// when the buffer ends before a terminating byte (high bit clear) is
/// found; the caller should wait for more data.
pub fn decode_varint(buf: &[u8], offset: usize) -> Result<Option<(u64, usize)>, VarintOverflow> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().skip(offset).enumerate() {
        if i >= MAX_VARINT_LEN {
            return Err(VarintOverflow);
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            // Last permitted byte may only contribute one bit.
            if i == MAX_VARINT_LEN - 1 && byte > 1 {
                return Err(VarintOverflow);
            }
            return Ok(Some((value, i + 1)));
        }
        shift += 7;
    }
    Ok(None)
}

/// Encode `value` as a varint, appending to `out`.
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Split a decoded tag varint into `(field_number, wire_type)`.
pub fn split_tag(tag: u64) -> (u64, u64) {
    (tag >> 3, tag & 0x7)
}
