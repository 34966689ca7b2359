//! TLS backend interface.
//!
//! A [`SecureConnection`](crate::connection::SecureConnection) only talks to its TLS
//! backend through [`TlsSession`]: one session per connection, driven over a [`Wire`]
//! that maps every call to a single non-blocking socket operation. Sessions are minted
//! by a [`TlsConnector`].
//!
//! The backend is chosen at build time, one of:
//!
//! - `rustls` (default): rustls with the ring provider
//! - `native-tls`: the platform library, i.e. SChannel on Windows, Security.framework
//!   on macOS and OpenSSL elsewhere
//!
//! With neither feature, [`TlsConnector::builder`] still exists but building or using a
//! connector fails with [`TransportError::Unsupported`](crate::protocol::TransportError::Unsupported).

use std::io;

#[cfg(all(feature = "rustls", feature = "native-tls"))]
compile_error!("features `rustls` and `native-tls` select different tls backends, enable only one of them");

mod connector;
pub use connector::TlsConnector;
pub use connector::TlsConnectorBuilder;

#[cfg(feature = "rustls")]
mod rustls_session;
#[cfg(feature = "rustls")]
pub use rustls_session::RustlsSession;

#[cfg(feature = "native-tls")]
mod native_session;
#[cfg(feature = "native-tls")]
pub use native_session::NativeTlsSession;

/// The transport a session reads ciphertext from and writes ciphertext to.
///
/// Reads and writes never block: an idle socket yields `ErrorKind::WouldBlock`.
pub trait Wire: io::Read + io::Write {}

impl<T: io::Read + io::Write> Wire for T {}

/// Outcome of one handshake step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    Complete,
    /// Retry once the socket is readable.
    WantRead,
    /// Retry once the socket is writable.
    WantWrite,
    Failed(String),
}

/// One client-side TLS session bound to one socket.
pub trait TlsSession: Send + 'static {
    /// Advances the handshake as far as the wire allows.
    fn handshake(&mut self, wire: &mut dyn Wire) -> Handshake;

    /// Decrypts into `buf`.
    ///
    /// `Ok(0)` means the peer closed the session; `WouldBlock` means no complete record
    /// is available yet.
    fn read(&mut self, wire: &mut dyn Wire, buf: &mut [u8]) -> io::Result<usize>;

    /// Encrypts `data` and flushes the resulting records, returning the plaintext bytes
    /// accepted.
    fn write(&mut self, wire: &mut dyn Wire, data: &[u8]) -> io::Result<usize>;

    /// Whether decrypted bytes are waiting that a read would return without touching the
    /// wire.
    fn has_buffered_plaintext(&self) -> bool {
        false
    }

    /// Sends close-notify, best effort.
    fn close(&mut self, wire: &mut dyn Wire);
}
