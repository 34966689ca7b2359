//! [`TlsSession`] backed by a rustls client connection.

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection};
use tracing::trace;

use crate::protocol::TransportError;
use crate::tls::{Handshake, TlsSession, Wire};

pub struct RustlsSession {
    conn: ClientConnection,
    buffered_plaintext: bool,
}

impl RustlsSession {
    /// # Errors
    ///
    /// [`TransportError::CannotCreateContext`] if `host` is not a DNS name or IP address,
    /// or rustls rejects the configuration.
    pub fn new(config: Arc<ClientConfig>, host: &str) -> Result<Self, TransportError> {
        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|e| TransportError::cannot_create_context(format!("invalid server name {host}: {e}")))?;
        let conn = ClientConnection::new(config, server_name).map_err(TransportError::cannot_create_context)?;
        Ok(Self { conn, buffered_plaintext: false })
    }

    /// Feeds received records to rustls and answers with any records it produced.
    fn process(&mut self, mut wire: &mut dyn Wire) -> io::Result<()> {
        let state = match self.conn.process_new_packets() {
            Ok(state) => state,
            Err(e) => {
                // deliver the alert describing the failure, if any
                let _ = self.conn.write_tls(&mut wire);
                return Err(io::Error::new(ErrorKind::InvalidData, e));
            }
        };
        self.buffered_plaintext = state.plaintext_bytes_to_read() > 0;
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut wire) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl TlsSession for RustlsSession {
    fn handshake(&mut self, mut wire: &mut dyn Wire) -> Handshake {
        loop {
            while self.conn.wants_write() {
                match self.conn.write_tls(&mut wire) {
                    Ok(_) => {}
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Handshake::WantWrite,
                    Err(e) => return Handshake::Failed(e.to_string()),
                }
            }

            if !self.conn.is_handshaking() {
                trace!(alpn = ?self.conn.alpn_protocol(), version = ?self.conn.protocol_version(), "tls handshake complete");
                return Handshake::Complete;
            }

            match self.conn.read_tls(&mut wire) {
                Ok(0) => return Handshake::Failed("peer closed the connection during the handshake".into()),
                Ok(_) => {
                    if let Err(e) = self.process(wire) {
                        return Handshake::Failed(e.to_string());
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Handshake::WantRead,
                Err(e) => return Handshake::Failed(e.to_string()),
            }
        }
    }

    fn read(&mut self, mut wire: &mut dyn Wire, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) => {
                    self.buffered_plaintext = n == buf.len();
                    return Ok(n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => self.buffered_plaintext = false,
                Err(e) => return Err(e),
            }

            // rustls reports a bare TCP end of stream as UnexpectedEof on the next reader call
            if self.conn.read_tls(&mut wire)? > 0 {
                self.process(wire)?;
            }
        }
    }

    fn write(&mut self, mut wire: &mut dyn Wire, data: &[u8]) -> io::Result<usize> {
        let n = self.conn.writer().write(data)?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut wire)?;
        }
        Ok(n)
    }

    fn has_buffered_plaintext(&self) -> bool {
        self.buffered_plaintext
    }

    fn close(&mut self, mut wire: &mut dyn Wire) {
        self.conn.send_close_notify();
        while self.conn.wants_write() {
            if self.conn.write_tls(&mut wire).is_err() {
                break;
            }
        }
    }
}

impl fmt::Debug for RustlsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RustlsSession")
            .field("handshaking", &self.conn.is_handshaking())
            .field("buffered_plaintext", &self.buffered_plaintext)
            .finish()
    }
}
