//! Incremental frame extraction for the Twirp streaming wire format.
//!
//! A response stream is a sequence of length-delimited frames: message
//! frames carrying encoded application payloads, then exactly one trailer
//! frame that terminates the stream. Chunk boundaries are arbitrary, so
//! extraction must tolerate a frame split anywhere, including inside a
//! varint.

use std::ops::Range;

use crate::varint::{MESSAGE_TAG, TRAILER_TAG, decode_varint};

/// What a frame carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// An encoded application message.
    Message,
    /// The stream trailer (EOF sentinel or a JSON error).
    Trailer,
}

/// One complete frame located inside the caller's buffer.
///
/// `payload` is a byte range into that buffer rather than an owned copy,
/// so the caller decides when (and whether) to copy payload bytes out
/// before advancing the buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Range<usize>,
}

/// Result of one extraction pass over a buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Extraction {
    /// Complete frames found, in stream order.
    pub frames: Vec<Frame>,
    /// Bytes fully consumed; the caller must retain everything after this
    /// offset and prepend it to the next chunk.
    pub consumed: usize,
    /// When a frame header was complete but its payload was not,
    /// the number of payload bytes still missing. `None` when the buffer
    /// ended mid-varint instead.
    pub needed: Option<usize>,
}

/// Structural failures in the frame layer.
///
/// These are unrecoverable for the stream: the decoder cannot resynchronize
/// after a malformed header, so the session must fail.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("unexpected field tag {tag} in stream frame")]
    UnknownTag { tag: u64 },
    #[error("frame header varint exceeds 10 bytes")]
    VarintOverflow,
    #[error("frame length {length} exceeds addressable range")]
    LengthOverflow { length: u64 },
}

impl From<crate::varint::VarintOverflow> for FrameError {
    fn from(_: crate::varint::VarintOverflow) -> Self {
        FrameError::VarintOverflow
    }
}

/// Extract every complete frame from `buf`.
///
/// Walks the buffer frame by frame. Offsets are recomputed from the buffer
/// on every iteration, so `consumed` is always exact. Extraction stops at
/// the first trailer frame; any bytes after it are ignored and reported
/// as consumed.
///
/// A structural error is only returned once every complete frame before
/// it has been handed out: when frames were already extracted in this
/// pass, extraction stops at the bad frame instead (it stays in the
/// retained region) and the next pass reports the error. This keeps the
/// emitted-frame sequence independent of chunk boundaries even for
/// malformed streams.
pub fn extract_frames(buf: &[u8]) -> Result<Extraction, FrameError> {
    let mut frames = Vec::new();
    let mut offset = 0usize;

    while offset < buf.len() {
        let frame_start = offset;

        let (tag, tag_len) = match decode_varint(buf, offset) {
            Ok(Some(v)) => v,
            // Mid-varint: retain from the frame start, no size hint.
            Ok(None) => {
                return Ok(Extraction {
                    frames,
                    consumed: frame_start,
                    needed: None,
                });
            }
            Err(e) => return halt(frames, frame_start, e.into()),
        };
        if tag != MESSAGE_TAG && tag != TRAILER_TAG {
            return halt(frames, frame_start, FrameError::UnknownTag { tag });
        }

        let (length, len_len) = match decode_varint(buf, offset + tag_len) {
            Ok(Some(v)) => v,
            Ok(None) => {
                return Ok(Extraction {
                    frames,
                    consumed: frame_start,
                    needed: None,
                });
            }
            Err(e) => return halt(frames, frame_start, e.into()),
        };
        let length = match usize::try_from(length) {
            Ok(length) => length,
            Err(_) => return halt(frames, frame_start, FrameError::LengthOverflow { length }),
        };

        let payload_start = offset + tag_len + len_len;
        let payload_end = match payload_start.checked_add(length) {
            Some(end) => end,
            None => {
                return halt(
                    frames,
                    frame_start,
                    FrameError::LengthOverflow {
                        length: length as u64,
                    },
                );
            }
        };
        if payload_end > buf.len() {
            // Header complete, payload short: report exactly how much is
            // missing and retain from the frame start.
            return Ok(Extraction {
                frames,
                consumed: frame_start,
                needed: Some(payload_end - buf.len()),
            });
        }

        let kind = if tag == MESSAGE_TAG {
            FrameKind::Message
        } else {
            FrameKind::Trailer
        };
        frames.push(Frame {
            kind,
            payload: payload_start..payload_end,
        });

        if kind == FrameKind::Trailer {
            // The trailer ends the stream; swallow anything after it.
            return Ok(Extraction {
                frames,
                consumed: buf.len(),
                needed: None,
            });
        }
        offset = payload_end;
    }

    Ok(Extraction {
        frames,
        consumed: offset,
        needed: None,
    })
}

/// Defer a structural error while complete frames are pending delivery;
/// the caller sees them first and hits the error on its next pass.
fn halt(frames: Vec<Frame>, consumed: usize, err: FrameError) -> Result<Extraction, FrameError> {
    if frames.is_empty() {
        Err(err)
    } else {
        Ok(Extraction {
            frames,
            consumed,
            needed: None,
        })
    }
}

/// Append a frame with the given tag and payload to `out`. Test and
/// tooling helper; the client never encodes frames.
pub fn encode_frame(tag: u64, payload: &[u8], out: &mut Vec<u8>) {
    crate::varint::encode_varint(tag, out);
    crate::varint::encode_varint(payload.len() as u64, out);
    out.extend_from_slice(payload);
}
