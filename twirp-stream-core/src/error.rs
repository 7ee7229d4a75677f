//! Twirp error codes and the structured error type.
//!
//! This module provides:
//! - [`Code`]: the closed taxonomy of wire-level error code strings
//! - [`TwirpError`]: the structured error exchanged between client and server
//! - [`classify_error_body`]: mapping of non-success HTTP bodies to errors

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Deserialize;

/// Twirp error codes, matching the wire-level `code` strings.
///
/// `transport` is client-local and never sent by a server; the rest match
/// the Twirp specification. Servers may also send codes outside this
/// taxonomy; those pass through [`TwirpError`] verbatim and parse as
/// [`Code::Unknown`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Code {
    Transport,
    Internal,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    BadRoute,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Unavailable,
    DataLoss,
}

impl Code {
    /// Get the wire string for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Transport => "transport",
            Code::Internal => "internal",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid_argument",
            Code::DeadlineExceeded => "deadline_exceeded",
            Code::NotFound => "not_found",
            Code::BadRoute => "bad_route",
            Code::AlreadyExists => "already_exists",
            Code::PermissionDenied => "permission_denied",
            Code::Unauthenticated => "unauthenticated",
            Code::ResourceExhausted => "resource_exhausted",
            Code::FailedPrecondition => "failed_precondition",
            Code::Aborted => "aborted",
            Code::OutOfRange => "out_of_range",
            Code::Unimplemented => "unimplemented",
            Code::Unavailable => "unavailable",
            Code::DataLoss => "data_loss",
        }
    }

    /// Returns whether this code indicates a transient condition that may
    /// be resolved by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Code::Unavailable | Code::ResourceExhausted | Code::Aborted
        )
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`Code`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseCodeError(());

impl std::fmt::Display for ParseCodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown error code")
    }
}

impl std::error::Error for ParseCodeError {}

impl FromStr for Code {
    type Err = ParseCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transport" => Ok(Code::Transport),
            "internal" => Ok(Code::Internal),
            "unknown" => Ok(Code::Unknown),
            "invalid_argument" => Ok(Code::InvalidArgument),
            "deadline_exceeded" => Ok(Code::DeadlineExceeded),
            "not_found" => Ok(Code::NotFound),
            "bad_route" => Ok(Code::BadRoute),
            "already_exists" => Ok(Code::AlreadyExists),
            "permission_denied" => Ok(Code::PermissionDenied),
            "unauthenticated" => Ok(Code::Unauthenticated),
            "resource_exhausted" => Ok(Code::ResourceExhausted),
            "failed_precondition" => Ok(Code::FailedPrecondition),
            "aborted" => Ok(Code::Aborted),
            "out_of_range" => Ok(Code::OutOfRange),
            "unimplemented" => Ok(Code::Unimplemented),
            "unavailable" => Ok(Code::Unavailable),
            "data_loss" => Ok(Code::DataLoss),
            _ => Err(ParseCodeError(())),
        }
    }
}

/// The structured error delivered to consumers.
///
/// Carries the wire-level code string verbatim (so server-defined codes
/// outside the taxonomy survive a round trip), a human-readable message,
/// and an optional map of diagnostic strings.
///
/// Every failure the client reports, whether server-sent or synthesized
/// locally, is a `TwirpError`; no raw HTTP or JSON error values cross
/// the client boundary.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("twirp error {code}: {message}")]
pub struct TwirpError {
    code: String,
    message: String,
    meta: BTreeMap<String, String>,
}

impl TwirpError {
    /// Create a new error with a taxonomy code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Self {
            code: code.as_str().to_owned(),
            message: message.into(),
            meta: BTreeMap::new(),
        }
    }

    /// Create an error with a verbatim wire code string.
    pub fn from_wire<C: Into<String>, S: Into<String>>(code: C, message: S) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            meta: BTreeMap::new(),
        }
    }

    /// Get the taxonomy code; unrecognized wire codes parse as
    /// [`Code::Unknown`].
    pub fn code(&self) -> Code {
        self.code.parse().unwrap_or(Code::Unknown)
    }

    /// Get the verbatim wire code string.
    pub fn wire_code(&self) -> &str {
        &self.code
    }

    /// Get the human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the diagnostic metadata map.
    pub fn meta(&self) -> &BTreeMap<String, String> {
        &self.meta
    }

    /// Attach a diagnostic key/value pair.
    pub fn with_meta<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    // Convenience constructors for locally synthesized errors.

    /// Create an internal error.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Internal, message)
    }

    /// Create a transport error.
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Transport, message)
    }

    /// Create an invalid argument error.
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// Create an unavailable error.
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unavailable, message)
    }

    /// Returns whether this error indicates a transient condition that may
    /// be resolved by retrying. Convenience wrapper for
    /// [`Code::is_retryable()`].
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// Wire shape of a Twirp error body.
///
/// Absent fields take the defaults the protocol prescribes, so a bare
/// `{}` still decodes to `unknown` / "Uninitialized error".
#[derive(Deserialize)]
struct WireError {
    #[serde(default = "default_msg")]
    msg: String,
    #[serde(default = "default_code")]
    code: String,
    #[serde(default)]
    meta: BTreeMap<String, String>,
}

fn default_msg() -> String {
    "Uninitialized error".to_owned()
}

fn default_code() -> String {
    "unknown".to_owned()
}

impl From<WireError> for TwirpError {
    fn from(wire: WireError) -> Self {
        TwirpError {
            code: wire.code,
            message: wire.msg,
            meta: wire.meta,
        }
    }
}

/// Decode a Twirp error body (trailer payload or non-success HTTP body).
pub(crate) fn decode_error_json(body: &[u8]) -> Result<TwirpError, serde_json::Error> {
    serde_json::from_slice::<WireError>(body).map(TwirpError::from)
}

/// Classify the body of a non-success HTTP response.
///
/// Well-formed bodies yield the server's error verbatim; bodies that fail
/// to decode are downgraded to an `internal` error carrying the raw text
/// in `meta.rawErr` rather than propagated as a decode failure.
pub fn classify_error_body(body: &[u8]) -> TwirpError {
    match decode_error_json(body) {
        Ok(err) => err,
        Err(_) => TwirpError::internal("received a twirp error but can't decode it")
            .with_meta("rawErr", String::from_utf8_lossy(body)),
    }
}
