use std::fmt;
use std::time::Duration;

#[cfg(feature = "rustls")]
use std::sync::Arc;

use crate::protocol::TransportError;
use crate::tls::TlsSession;

/// Factory of client [`TlsSession`]s sharing one configuration.
///
/// ```no_run
/// use std::time::Duration;
/// use lynx_http::tls::TlsConnector;
///
/// let connector = TlsConnector::builder()
///     .with_webpki_roots()
///     .alpn_protocols(["http/1.1"])
///     .handshake_timeout(Duration::from_secs(10))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct TlsConnector {
    #[cfg(feature = "rustls")]
    config: Arc<rustls::ClientConfig>,
    #[cfg(feature = "native-tls")]
    connector: native_tls::TlsConnector,
    handshake_timeout: Option<Duration>,
}

impl TlsConnector {
    pub fn builder() -> TlsConnectorBuilder {
        TlsConnectorBuilder::default()
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout
    }

    /// Creates a session that validates the peer certificate against `host`.
    ///
    /// # Errors
    ///
    /// [`TransportError::CannotCreateContext`] if `host` is not a valid server name.
    #[cfg(feature = "rustls")]
    pub fn session(&self, host: &str) -> Result<Box<dyn TlsSession>, TransportError> {
        let session = crate::tls::RustlsSession::new(self.config.clone(), host)?;
        Ok(Box::new(session))
    }

    #[cfg(feature = "native-tls")]
    pub fn session(&self, host: &str) -> Result<Box<dyn TlsSession>, TransportError> {
        let session = crate::tls::NativeTlsSession::new(self.connector.clone(), host)?;
        Ok(Box::new(session))
    }

    #[cfg(not(any(feature = "rustls", feature = "native-tls")))]
    pub fn session(&self, _host: &str) -> Result<Box<dyn TlsSession>, TransportError> {
        Err(TransportError::Unsupported)
    }
}

impl fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConnector").field("handshake_timeout", &self.handshake_timeout).finish_non_exhaustive()
    }
}

/// Builder for [`TlsConnector`].
#[derive(Debug)]
#[cfg_attr(
    not(any(feature = "rustls", feature = "native-tls")),
    allow(dead_code, reason = "only read by the tls backends")
)]
pub struct TlsConnectorBuilder {
    #[cfg(feature = "rustls")]
    roots: rustls::RootCertStore,
    /// DER certificates, converted by `build`.
    #[cfg(feature = "native-tls")]
    roots: Vec<Vec<u8>>,
    #[cfg(feature = "native-tls")]
    platform_roots: bool,
    alpn_protocols: Vec<Vec<u8>>,
    handshake_timeout: Option<Duration>,
    errors: Vec<String>,
}

impl Default for TlsConnectorBuilder {
    fn default() -> Self {
        Self {
            #[cfg(feature = "rustls")]
            roots: rustls::RootCertStore::empty(),
            #[cfg(feature = "native-tls")]
            roots: Vec::new(),
            #[cfg(feature = "native-tls")]
            platform_roots: false,
            alpn_protocols: Vec::new(),
            handshake_timeout: None,
            errors: Vec::new(),
        }
    }
}

impl TlsConnectorBuilder {
    /// Trusts the Mozilla root program shipped with `webpki-roots`.
    ///
    /// The `native-tls` backend trusts the platform store instead.
    pub fn with_webpki_roots(mut self) -> Self {
        #[cfg(feature = "rustls")]
        self.roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        #[cfg(feature = "native-tls")]
        {
            self.platform_roots = true;
        }
        self
    }

    /// Trusts every certificate of a PEM bundle. Parse failures are reported by `build`.
    pub fn add_root_pem(mut self, pem: &[u8]) -> Self {
        #[cfg(any(feature = "rustls", feature = "native-tls"))]
        {
            let mut reader = pem;
            match rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>() {
                Ok(certs) if certs.is_empty() => self.errors.push("no certificates found in PEM".into()),
                #[cfg(feature = "rustls")]
                Ok(certs) => {
                    let (_, ignored) = self.roots.add_parsable_certificates(certs);
                    if ignored > 0 {
                        self.errors.push(format!("{ignored} certificates could not be parsed"));
                    }
                }
                #[cfg(feature = "native-tls")]
                Ok(certs) => self.roots.extend(certs.iter().map(|cert| cert.to_vec())),
                Err(e) => self.errors.push(e.to_string()),
            }
        }
        #[cfg(not(any(feature = "rustls", feature = "native-tls")))]
        let _ = pem;
        self
    }

    pub fn alpn_protocols<I, P>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        self.alpn_protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Bounds how long `connect` may spend in the handshake.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// # Errors
    ///
    /// [`TransportError::CannotCreateContext`] when a PEM bundle was rejected or no root
    /// is trusted; [`TransportError::Unsupported`] without a tls backend feature.
    #[cfg(feature = "rustls")]
    pub fn build(self) -> Result<TlsConnector, TransportError> {
        use rustls::crypto::ring::default_provider;

        if let Some(error) = self.errors.first() {
            return Err(TransportError::cannot_create_context(error));
        }
        if self.roots.is_empty() {
            return Err(TransportError::cannot_create_context("no trusted root certificates configured"));
        }

        let mut config = rustls::ClientConfig::builder_with_provider(Arc::new(default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(TransportError::cannot_create_context)?
            .with_root_certificates(self.roots)
            .with_no_client_auth();
        config.alpn_protocols = self.alpn_protocols;

        Ok(TlsConnector { config: Arc::new(config), handshake_timeout: self.handshake_timeout })
    }

    /// # Errors
    ///
    /// [`TransportError::CannotCreateContext`] when a PEM bundle was rejected, no root
    /// is trusted, an ALPN protocol is not UTF-8 or the platform library refuses the
    /// configuration.
    #[cfg(feature = "native-tls")]
    pub fn build(self) -> Result<TlsConnector, TransportError> {
        use native_tls::{Certificate, Protocol};

        if let Some(error) = self.errors.first() {
            return Err(TransportError::cannot_create_context(error));
        }
        if !self.platform_roots && self.roots.is_empty() {
            return Err(TransportError::cannot_create_context("no trusted root certificates configured"));
        }

        let mut builder = native_tls::TlsConnector::builder();
        builder.min_protocol_version(Some(Protocol::Tlsv12)).disable_built_in_roots(!self.platform_roots);
        for der in &self.roots {
            let cert = Certificate::from_der(der).map_err(TransportError::cannot_create_context)?;
            builder.add_root_certificate(cert);
        }
        let alpn = self
            .alpn_protocols
            .iter()
            .map(|protocol| std::str::from_utf8(protocol))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TransportError::cannot_create_context(format!("alpn protocol is not utf-8: {e}")))?;
        if !alpn.is_empty() {
            builder.request_alpns(&alpn);
        }
        let connector = builder.build().map_err(TransportError::cannot_create_context)?;

        Ok(TlsConnector { connector, handshake_timeout: self.handshake_timeout })
    }

    #[cfg(not(any(feature = "rustls", feature = "native-tls")))]
    pub fn build(self) -> Result<TlsConnector, TransportError> {
        Err(TransportError::Unsupported)
    }
}

#[cfg(all(test, any(feature = "rustls", feature = "native-tls")))]
mod tests {
    use super::*;

    #[test]
    fn requires_roots() {
        let result = TlsConnector::builder().build();
        assert!(matches!(result, Err(TransportError::CannotCreateContext { .. })));
    }

    #[test]
    fn rejects_garbage_pem() {
        let result = TlsConnector::builder().with_webpki_roots().add_root_pem(b"not a certificate").build();
        assert!(matches!(result, Err(TransportError::CannotCreateContext { .. })));
    }

    #[test]
    fn sessions_validate_server_name() {
        let connector = TlsConnector::builder()
            .with_webpki_roots()
            .handshake_timeout(Duration::from_secs(3))
            .build()
            .unwrap();

        assert_eq!(connector.handshake_timeout(), Some(Duration::from_secs(3)));
        assert!(connector.session("example.com").is_ok());
        assert!(matches!(connector.session("not a host name"), Err(TransportError::CannotCreateContext { .. })));
    }

    #[test]
    fn accepts_fixture_root() {
        let ca = include_bytes!("../../resources/tls/ca.pem");
        let connector = TlsConnector::builder().add_root_pem(ca).alpn_protocols(["http/1.1"]).build().unwrap();

        assert!(connector.session("localhost").is_ok());
        assert!(connector.session("127.0.0.1").is_ok());
    }

    #[test]
    fn rejects_pem_without_certificates() {
        let key = include_bytes!("../../resources/tls/localhost.key");
        let result = TlsConnector::builder().add_root_pem(key).build();
        assert!(matches!(result, Err(TransportError::CannotCreateContext { .. })));
    }
}
