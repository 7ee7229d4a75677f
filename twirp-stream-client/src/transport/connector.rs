//! TLS connector setup for the hyper HTTP client.
//!
//! TLS support requires both a crypto provider and root certificates:
//!
//! - **Crypto providers** (choose one):
//!   - `tls-ring` - Use ring crypto (default with `tls` feature)
//!   - `tls-aws-lc` - Use AWS LC crypto
//!
//! - **Root certificates** (choose one):
//!   - `tls-native-roots` - Use system root certificates (default with `tls` feature)
//!   - `tls-webpki-roots` - Use bundled Mozilla root certificates
//!
//! The `tls` feature enables `tls-ring` + `tls-native-roots` for convenience.

#[cfg(any(feature = "tls-ring", feature = "tls-aws-lc"))]
use std::sync::Arc;

use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use rustls::ClientConfig;

/// Check if TLS features are properly configured.
///
/// Returns true if both a crypto provider AND root certificates are available.
#[inline]
pub const fn has_tls_support() -> bool {
    cfg!(any(feature = "tls-ring", feature = "tls-aws-lc"))
        && cfg!(any(
            feature = "tls-native-roots",
            feature = "tls-webpki-roots"
        ))
}

/// Try to get a crypto provider ConfigBuilder.
///
/// Prefers a feature-gated provider, then a user-installed global default.
fn try_get_crypto_provider_builder()
-> Option<rustls::ConfigBuilder<ClientConfig, rustls::WantsVerifier>> {
    #[cfg(feature = "tls-ring")]
    return Some({
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .expect("safe default protocol versions should be valid")
    });

    #[cfg(all(feature = "tls-aws-lc", not(feature = "tls-ring")))]
    return Some({
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .expect("safe default protocol versions should be valid")
    });

    #[cfg(not(any(feature = "tls-ring", feature = "tls-aws-lc")))]
    {
        rustls::crypto::CryptoProvider::get_default().map(|provider| {
            ClientConfig::builder_with_provider(provider.clone())
                .with_safe_default_protocol_versions()
                .expect("safe default protocol versions should be valid")
        })
    }
}

/// Build the default TLS configuration.
///
/// Uses feature-gated root certificates (native or webpki) and either a
/// feature-gated crypto provider or a user-installed global default.
/// Returns `None` if no crypto provider is available.
#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
pub fn default_tls_config() -> Option<ClientConfig> {
    let builder = try_get_crypto_provider_builder()?;
    let roots = build_root_store();

    Some(builder.with_root_certificates(roots).with_no_client_auth())
}

/// Build the root certificate store from enabled features.
#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
fn build_root_store() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();

    // Prefer native roots over webpki when both are enabled.
    #[cfg(feature = "tls-native-roots")]
    {
        let native_certs = rustls_native_certs::load_native_certs();
        if !native_certs.errors.is_empty() {
            tracing::debug!("errors loading native certs: {:?}", native_certs.errors);
        }
        roots.add_parsable_certificates(native_certs.certs);
    }

    #[cfg(all(feature = "tls-webpki-roots", not(feature = "tls-native-roots")))]
    {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    roots
}

/// Build an HTTPS connector with the given TLS configuration.
///
/// With no custom config, falls back to [`default_tls_config`].
///
/// # Panics
///
/// Panics when no TLS config can be built: no custom config, and either no
/// root certificate feature enabled or no crypto provider available.
pub fn build_https_connector(tls_config: Option<ClientConfig>) -> HttpsConnector<HttpConnector> {
    let config = match tls_config {
        Some(config) => config,
        None => {
            #[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
            {
                default_tls_config().unwrap_or_else(|| {
                    panic!(
                        "HTTPS requires a crypto provider. Either:\n\
                         - Enable `tls-ring` or `tls-aws-lc` feature, or\n\
                         - Install a global crypto provider via `CryptoProvider::install_default()`"
                    );
                })
            }

            #[cfg(not(any(feature = "tls-native-roots", feature = "tls-webpki-roots")))]
            {
                panic!(
                    "HTTPS requires TLS root certificates. Enable `tls-native-roots` or \
                     `tls-webpki-roots`, or the `tls` feature for sensible defaults."
                );
            }
        }
    };

    HttpsConnectorBuilder::new()
        .with_tls_config(config)
        .https_or_http()
        .enable_all_versions()
        .build()
}

/// Build an HTTP-only connector (no TLS).
///
/// Use this for development/testing with `http://` URLs.
pub fn build_http_connector() -> HttpConnector {
    let mut connector = HttpConnector::new();
    connector.enforce_http(false);
    connector
}
