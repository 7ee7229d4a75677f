//! Client builder.

use twirp_stream_core::TwirpError;

use crate::client::TwirpClient;
use crate::transport::HttpTransport;

/// Default bound on the event channel between the pump and the consumer.
const DEFAULT_STREAM_BUFFER: usize = 16;

/// Builder for [`TwirpClient`].
///
/// # Example
///
/// ```ignore
/// let client = TwirpClient::builder("https://api.example.com")
///     .stream_buffer(4)
///     .build()?;
/// ```
#[derive(Debug)]
pub struct ClientBuilder {
    base_url: String,
    transport: Option<HttpTransport>,
    stream_buffer: usize,
}

impl ClientBuilder {
    /// Create a builder for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            transport: None,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    /// Use a custom transport instead of the default one.
    pub fn with_transport(mut self, transport: HttpTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set how many decoded messages may sit between the pump and the
    /// consumer before body reads stall. Must be at least 1.
    ///
    /// Default: 16.
    pub fn stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity.max(1);
        self
    }

    /// Build the client.
    ///
    /// Fails with `invalid_argument` when the base URL is not an absolute
    /// http/https URL, and with `transport` when the default transport
    /// cannot be constructed.
    pub fn build(self) -> Result<TwirpClient, TwirpError> {
        let uri: http::Uri = self.base_url.parse().map_err(|e: http::uri::InvalidUri| {
            TwirpError::invalid_argument("invalid base URL").with_meta("cause", e.to_string())
        })?;
        if uri.scheme_str() != Some("http") && uri.scheme_str() != Some("https") {
            return Err(TwirpError::invalid_argument(
                "base URL must use http or https",
            ));
        }
        if uri.authority().is_none() {
            return Err(TwirpError::invalid_argument("base URL must have a host"));
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => HttpTransport::new()?,
        };

        Ok(TwirpClient::new(
            transport,
            self.base_url,
            self.stream_buffer,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twirp_stream_core::Code;

    #[test]
    fn test_rejects_relative_url() {
        let err = ClientBuilder::new("not a url").build().unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        let err = ClientBuilder::new("ftp://host/x").build().unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn test_stream_buffer_floor() {
        let builder = ClientBuilder::new("http://host").stream_buffer(0);
        assert_eq!(builder.stream_buffer, 1);
    }

    #[cfg(all(
        any(feature = "tls-ring", feature = "tls-aws-lc"),
        any(feature = "tls-native-roots", feature = "tls-webpki-roots")
    ))]
    #[test]
    fn test_builds_with_defaults() {
        assert!(ClientBuilder::new("https://api.example.com").build().is_ok());
    }
}
