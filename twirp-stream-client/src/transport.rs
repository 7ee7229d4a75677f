//! HTTP transport layer.
//!
//! This module provides the [`HttpTransport`] type, which handles HTTP
//! communication using hyper_util's legacy client. It supports:
//!
//! - HTTP/1.1 and HTTP/2 with automatic protocol negotiation
//! - TLS with rustls (feature-gated)
//! - Connection pooling
//!
//! # Feature Flags
//!
//! TLS support requires enabling the appropriate features:
//!
//! - `tls` (default) - Enables `tls-ring` + `tls-native-roots` for convenience
//! - `tls-ring` / `tls-aws-lc` - Crypto providers
//! - `tls-native-roots` / `tls-webpki-roots` - Root certificates

mod body;
mod connector;
mod hyper;

pub use body::TransportBody;
pub use connector::{build_http_connector, build_https_connector, has_tls_support};
pub use hyper::{HttpTransport, HttpTransportBuilder};

#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
pub use connector::default_tls_config;
