//! Trailer payload interpretation.
//!
//! Every stream ends with exactly one trailer frame. Its payload is either
//! the literal sentinel `EOF` (clean completion) or a JSON error object in
//! the same shape as a non-success HTTP body.

use crate::error::{TwirpError, decode_error_json};

/// The trailer payload's EOF sentinel.
pub const EOF_SENTINEL: &str = "EOF";

/// Outcome of interpreting a trailer payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trailer {
    /// Clean end of stream.
    Eof,
    /// Server-signaled failure.
    Error(TwirpError),
}

/// Interpret a trailer frame's payload.
///
/// Interpretation is total: malformed payloads become `internal` errors
/// with diagnostics in `meta` rather than parse failures, so the session
/// always reaches a terminal state.
pub fn interpret_trailer(payload: &[u8]) -> Trailer {
    let text = match std::str::from_utf8(payload) {
        Ok(text) => text,
        Err(e) => {
            return Trailer::Error(
                TwirpError::internal("Unable to decode response")
                    .with_meta("cause", e.to_string()),
            );
        }
    };
    if text == EOF_SENTINEL {
        return Trailer::Eof;
    }
    match decode_error_json(text.as_bytes()) {
        Ok(err) => Trailer::Error(err),
        Err(_) => Trailer::Error(
            TwirpError::internal("received a malformed error").with_meta("rawErr", text),
        ),
    }
}
