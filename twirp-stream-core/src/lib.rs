//! Wire-level protocol types for Twirp streaming RPC.
//!
//! This crate provides the shared, I/O-free pieces used by the client
//! crate (`twirp-stream-client`) and by test harnesses.
//!
//! ## Modules
//!
//! - [`varint`]: Varint and field-tag primitives
//! - [`frame`]: Incremental stream frame extraction
//! - [`trailer`]: Trailer payload interpretation
//! - [`error`]: Error codes, `TwirpError`, and HTTP error body handling

pub mod error;
pub mod frame;
pub mod trailer;
pub mod varint;

pub use error::{Code, TwirpError, classify_error_body};
pub use frame::{Extraction, Frame, FrameError, FrameKind, encode_frame, extract_frames};
pub use trailer::{EOF_SENTINEL, Trailer, interpret_trailer};
pub use varint::{MESSAGE_TAG, TRAILER_TAG, decode_varint, encode_varint, split_tag};
