//! [`TlsSession`] backed by the platform TLS library through `native-tls`.
//!
//! native-tls drives a blocking-style `Read + Write` stream, so the session hands it an
//! in-memory [`Spool`]: ciphertext is pulled from the wire into the spool before each
//! call and whatever the library wrote is flushed to the wire afterwards.

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::mem;
use std::net::IpAddr;

use bytes::{Buf, BytesMut};
use native_tls::{HandshakeError, MidHandshakeTlsStream, TlsConnector, TlsStream};
use tracing::trace;

use crate::protocol::TransportError;
use crate::tls::{Handshake, TlsSession, Wire};

const CHUNK: usize = 16 * 1024;

/// Ciphertext buffered between the wire and the platform library.
#[derive(Debug, Default)]
struct Spool {
    incoming: BytesMut,
    outgoing: BytesMut,
    eof: bool,
}

impl Spool {
    /// Moves every ciphertext byte the wire has ready into `incoming`.
    fn fill(&mut self, wire: &mut dyn Wire) -> io::Result<()> {
        let mut chunk = [0u8; CHUNK];
        while !self.eof {
            match wire.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => self.incoming.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Writes queued ciphertext to the wire, returning whether all of it went out.
    fn flush_to(&mut self, wire: &mut dyn Wire) -> io::Result<bool> {
        while !self.outgoing.is_empty() {
            match wire.write(&self.outgoing) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => self.outgoing.advance(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

impl Read for Spool {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.incoming.is_empty() {
            return if self.eof { Ok(0) } else { Err(ErrorKind::WouldBlock.into()) };
        }
        let n = buf.len().min(self.incoming.len());
        buf[..n].copy_from_slice(&self.incoming[..n]);
        self.incoming.advance(n);
        Ok(n)
    }
}

impl Write for Spool {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Stage {
    Idle(Spool),
    Handshaking(MidHandshakeTlsStream<Spool>),
    Open(TlsStream<Spool>),
    Failed,
}

impl Stage {
    fn spool(&mut self) -> Option<&mut Spool> {
        match self {
            Stage::Idle(spool) => Some(spool),
            Stage::Handshaking(mid) => Some(mid.get_mut()),
            Stage::Open(stream) => Some(stream.get_mut()),
            Stage::Failed => None,
        }
    }
}

pub struct NativeTlsSession {
    connector: TlsConnector,
    host: String,
    stage: Stage,
    buffered_plaintext: bool,
    peer_closed: bool,
}

impl NativeTlsSession {
    /// # Errors
    ///
    /// [`TransportError::CannotCreateContext`] if `host` is not a DNS name or IP address.
    pub fn new(connector: TlsConnector, host: &str) -> Result<Self, TransportError> {
        if !is_server_name(host) {
            return Err(TransportError::cannot_create_context(format!("invalid server name {host}")));
        }
        Ok(Self {
            connector,
            host: host.to_owned(),
            stage: Stage::Idle(Spool::default()),
            buffered_plaintext: false,
            peer_closed: false,
        })
    }

    fn open_stream(&mut self) -> io::Result<&mut TlsStream<Spool>> {
        match &mut self.stage {
            Stage::Open(stream) => Ok(stream),
            _ => Err(io::Error::new(ErrorKind::NotConnected, "tls session is not open")),
        }
    }
}

/// Flushes the library's output and maps a pending handshake to the readiness it needs.
fn pending(spool: &mut Spool, wire: &mut dyn Wire) -> Handshake {
    match spool.flush_to(wire) {
        Ok(true) => Handshake::WantRead,
        Ok(false) => Handshake::WantWrite,
        Err(e) => Handshake::Failed(e.to_string()),
    }
}

impl TlsSession for NativeTlsSession {
    fn handshake(&mut self, wire: &mut dyn Wire) -> Handshake {
        let Some(spool) = self.stage.spool() else {
            return Handshake::Failed("tls session already failed".into());
        };
        match spool.flush_to(wire) {
            Ok(true) => {}
            Ok(false) => return Handshake::WantWrite,
            Err(e) => return Handshake::Failed(e.to_string()),
        }
        if let Err(e) = spool.fill(wire) {
            return Handshake::Failed(e.to_string());
        }

        let result = match mem::replace(&mut self.stage, Stage::Failed) {
            Stage::Idle(spool) => self.connector.connect(&self.host, spool),
            Stage::Handshaking(mid) => mid.handshake(),
            Stage::Open(stream) => {
                self.stage = Stage::Open(stream);
                return Handshake::Complete;
            }
            Stage::Failed => return Handshake::Failed("tls session already failed".into()),
        };

        match result {
            Ok(mut stream) => {
                let flushed = pending(stream.get_mut(), wire);
                self.stage = Stage::Open(stream);
                match flushed {
                    Handshake::WantRead => {
                        trace!(host = %self.host, "tls handshake complete");
                        Handshake::Complete
                    }
                    other => other,
                }
            }
            Err(HandshakeError::WouldBlock(mut mid)) => {
                let next = pending(mid.get_mut(), wire);
                self.stage = Stage::Handshaking(mid);
                next
            }
            Err(HandshakeError::Failure(e)) => Handshake::Failed(e.to_string()),
        }
    }

    fn read(&mut self, wire: &mut dyn Wire, buf: &mut [u8]) -> io::Result<usize> {
        if self.peer_closed {
            return Ok(0);
        }
        let stream = self.open_stream()?;
        let spool = stream.get_mut();
        spool.flush_to(wire)?;
        spool.fill(wire)?;

        let mut filled = 0;
        let mut closed = false;
        while filled < buf.len() {
            match stream.read(&mut buf[filled..]) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                // a bare TCP end of stream surfaces as a library error
                Err(_) if stream.get_ref().eof && stream.get_ref().incoming.is_empty() => {
                    closed = true;
                    break;
                }
                Err(e) if filled == 0 => return Err(e),
                Err(_) => break,
            }
        }
        // alerts or key updates produced while reading
        stream.get_mut().flush_to(wire)?;

        self.peer_closed = closed;
        self.buffered_plaintext = filled == buf.len() || (closed && filled > 0);
        match filled {
            0 if closed => Ok(0),
            0 => Err(ErrorKind::WouldBlock.into()),
            n => Ok(n),
        }
    }

    fn write(&mut self, wire: &mut dyn Wire, data: &[u8]) -> io::Result<usize> {
        let stream = self.open_stream()?;
        if !stream.get_mut().flush_to(wire)? {
            return Err(ErrorKind::WouldBlock.into());
        }
        stream.write_all(data)?;
        if stream.get_mut().flush_to(wire)? {
            Ok(data.len())
        } else {
            Err(io::Error::new(ErrorKind::WouldBlock, "tls records only partially flushed"))
        }
    }

    fn has_buffered_plaintext(&self) -> bool {
        self.buffered_plaintext
    }

    fn close(&mut self, wire: &mut dyn Wire) {
        if let Stage::Open(stream) = &mut self.stage {
            let _ = stream.shutdown();
            let _ = stream.get_mut().flush_to(wire);
        }
    }
}

impl fmt::Debug for NativeTlsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self.stage {
            Stage::Idle(_) => "idle",
            Stage::Handshaking(_) => "handshaking",
            Stage::Open(_) => "open",
            Stage::Failed => "failed",
        };
        f.debug_struct("NativeTlsSession")
            .field("host", &self.host)
            .field("stage", &stage)
            .field("buffered_plaintext", &self.buffered_plaintext)
            .finish_non_exhaustive()
    }
}

/// An IP address or a DNS name made of LDH labels.
fn is_server_name(host: &str) -> bool {
    if host.parse::<IpAddr>().is_ok() {
        return true;
    }
    let name = host.strip_suffix('.').unwrap_or(host);
    !name.is_empty()
        && name.len() <= 253
        && name.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        })
}
