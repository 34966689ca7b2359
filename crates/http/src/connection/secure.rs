//! TLS transport.
//!
//! The handshake is a resumable loop: each [`Handshake::WantRead`] or
//! [`Handshake::WantWrite`] parks the task until the socket reports the matching
//! readiness, then the session is stepped again. The reader is armed only once the
//! connection is `Open`.

use std::fmt;
use std::future::poll_fn;
use std::io;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::connection::shared::{self, Link, Shared};
use crate::connection::socket::{CloseReason, ReadOutcome, Socket, SocketIo};
use crate::connection::{ConnectionHandle, ConnectionState, ReadHandler};
use crate::ensure;
use crate::protocol::TransportError;
use crate::tls::{Handshake, TlsConnector, TlsSession};

/// A TLS client connection delivering decrypted reads to a [`ReadHandler`].
pub struct SecureConnection {
    host: String,
    port: u16,
    shared: Arc<Shared>,
    session: Option<Box<dyn TlsSession>>,
    handshake_timeout: Option<Duration>,
    handler: Option<Box<dyn ReadHandler>>,
    reader: Option<JoinHandle<()>>,
}

impl SecureConnection {
    /// Creates a connection in state `Created` whose session validates `host`.
    ///
    /// # Errors
    ///
    /// [`TransportError::Unsupported`] when built without a TLS backend,
    /// [`TransportError::CannotCreateContext`] when `host` is not a valid server name.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        connector: &TlsConnector,
        handler: impl ReadHandler,
    ) -> Result<Self, TransportError> {
        let host = host.into();
        let session = connector.session(&host)?;
        let mut connection = Self::with_session(host, port, session, handler);
        connection.handshake_timeout = connector.handshake_timeout();
        Ok(connection)
    }

    /// Creates a connection around a session from any [`TlsSession`] backend.
    pub fn with_session(
        host: impl Into<String>,
        port: u16,
        session: Box<dyn TlsSession>,
        handler: impl ReadHandler,
    ) -> Self {
        let host = host.into();
        let shared = Shared::new(format!("{host}:{port}"), ConnectionState::Created);
        Self {
            host,
            port,
            shared,
            session: Some(session),
            handshake_timeout: None,
            handler: Some(Box::new(handler)),
            reader: None,
        }
    }

    /// Connects over TCP, completes the handshake and arms the reader.
    ///
    /// # Errors
    ///
    /// [`TransportError::UnableToConnect`] if the TCP connect or the handshake fails or
    /// times out. The connection is `Closed` afterwards and the read handler never runs.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        let state = self.state();
        ensure!(state == ConnectionState::Created, TransportError::unable_to_connect(format!("connection is {state}")));

        let stream = match TcpStream::connect((self.host.as_str(), self.port)).await {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(CloseReason::Failed(e.kind()));
                return Err(TransportError::unable_to_connect(e));
            }
        };
        self.connect_over(stream).await
    }

    /// Runs the handshake over an already connected socket.
    ///
    /// # Errors
    ///
    /// As [`connect`](SecureConnection::connect).
    pub async fn connect_over<S: Socket>(&mut self, socket: S) -> Result<(), TransportError> {
        let state = self.state();
        ensure!(state == ConnectionState::Created, TransportError::unable_to_connect(format!("connection is {state}")));
        let Some(mut session) = self.session.take() else {
            return Err(TransportError::unable_to_connect("tls session already released"));
        };

        self.shared.transition(ConnectionState::Connecting);
        let handshake = drive_handshake(&socket, session.as_mut());
        let result = match self.handshake_timeout {
            Some(timeout) => tokio::time::timeout(timeout, handshake)
                .await
                .unwrap_or_else(|_| Err(TransportError::unable_to_connect("tls handshake timed out"))),
            None => handshake.await,
        };

        if let Err(e) = result {
            error!(peer = %self.shared.peer(), cause = %e, "tls handshake failed");
            drop(session);
            self.fail(CloseReason::Failed(io::ErrorKind::Other));
            return Err(e);
        }

        if !self.shared.install(Box::new(SecureLink { socket, session, broken: false })) {
            return Err(TransportError::unable_to_connect("connection closed during the tls handshake"));
        }
        self.shared.transition(ConnectionState::Open);
        info!(peer = %self.shared.peer(), "tls connection open");

        if let Some(handler) = self.handler.take() {
            self.reader = Some(shared::arm(self.shared.clone(), handler));
        }
        Ok(())
    }

    fn fail(&mut self, reason: CloseReason) {
        self.session = None;
        self.handler = None;
        self.shared.close(reason);
    }

    /// Encrypts and writes `data`. See [`ConnectionHandle::send`].
    pub fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.shared.send(data)
    }

    /// Sends close-notify, then releases the session and the socket. Idempotent.
    pub fn close(&self) {
        self.shared.close(CloseReason::Local);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle::new(self.shared.clone())
    }

    /// Resolves once the connection is closed and its reader has stopped.
    pub async fn closed(&mut self) {
        self.handle().closed().await;
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
    }
}

impl fmt::Debug for SecureConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureConnection")
            .field("peer", &self.shared.peer())
            .field("state", &self.state())
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

impl Drop for SecureConnection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn drive_handshake<S: Socket>(socket: &S, session: &mut dyn TlsSession) -> Result<(), TransportError> {
    let mut retries = 0u32;
    loop {
        match session.handshake(&mut SocketIo(socket)) {
            Handshake::Complete => return Ok(()),
            Handshake::WantRead => {
                retries += 1;
                debug!(retries, "tls handshake waiting for read readiness");
                poll_fn(|cx| socket.poll_read_ready(cx)).await.map_err(TransportError::unable_to_connect)?;
            }
            Handshake::WantWrite => {
                retries += 1;
                debug!(retries, "tls handshake waiting for write readiness");
                poll_fn(|cx| socket.poll_write_ready(cx)).await.map_err(TransportError::unable_to_connect)?;
            }
            Handshake::Failed(reason) => return Err(TransportError::unable_to_connect(reason)),
        }
    }
}

struct SecureLink<S> {
    socket: S,
    session: Box<dyn TlsSession>,
    broken: bool,
}

impl<S: Socket> Link for SecureLink<S> {
    fn poll_read_ready(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.session.has_buffered_plaintext() {
            return Poll::Ready(Ok(()));
        }
        self.socket.poll_read_ready(cx)
    }

    fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        self.session.read(&mut SocketIo(&self.socket), buf).into()
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let result = match self.session.write(&mut SocketIo(&self.socket), data) {
            Ok(n) if n == data.len() => return Ok(()),
            Ok(n) => TransportError::send_failure(format!("tls session accepted {n} of {} bytes", data.len())),
            Err(e) => TransportError::send_failure(e),
        };
        // records of a failed send may still be queued in the session
        self.broken = true;
        Err(result)
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    fn shutdown(&mut self) {
        self.session.close(&mut SocketIo(&self.socket));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::socket::mock::MockSocket;
    use crate::tls::Wire;
    use std::collections::VecDeque;
    use std::io::{ErrorKind, Read, Write};
    use std::sync::{Mutex, OnceLock};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Scripted backend: plays back handshake steps, then decrypts by passing bytes
    /// through unchanged.
    struct ScriptedSession {
        steps: VecDeque<Handshake>,
        reads: VecDeque<io::Result<usize>>,
        closes: Arc<AtomicUsize>,
        observer: Arc<OnceLock<ConnectionHandle>>,
        observed: Arc<Mutex<Vec<ConnectionState>>>,
    }

    impl ScriptedSession {
        fn new(steps: impl IntoIterator<Item = Handshake>, closes: Arc<AtomicUsize>) -> Self {
            Self {
                steps: steps.into_iter().collect(),
                reads: VecDeque::new(),
                closes,
                observer: Arc::default(),
                observed: Arc::default(),
            }
        }

        fn then_reads(mut self, reads: impl IntoIterator<Item = io::Result<usize>>) -> Self {
            self.reads = reads.into_iter().collect();
            self
        }
    }

    impl TlsSession for ScriptedSession {
        fn handshake(&mut self, _wire: &mut dyn Wire) -> Handshake {
            if let Some(conn) = self.observer.get() {
                self.observed.lock().unwrap().push(conn.state());
            }
            self.steps.pop_front().unwrap_or(Handshake::Complete)
        }

        fn read(&mut self, wire: &mut dyn Wire, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(scripted) => {
                    // consume the readiness that triggered this read
                    let _ = wire.read(buf);
                    scripted
                }
                None => wire.read(buf),
            }
        }

        fn write(&mut self, wire: &mut dyn Wire, data: &[u8]) -> io::Result<usize> {
            wire.write(data)
        }

        fn close(&mut self, _wire: &mut dyn Wire) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Drop for ScriptedSession {
        fn drop(&mut self) {
            self.closes.fetch_add(100, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn handshake_retries_would_block_then_opens() {
        let socket = MockSocket::new();
        let closes = Arc::new(AtomicUsize::new(0));
        let session = ScriptedSession::new([Handshake::WantWrite, Handshake::WantWrite], closes.clone());
        let observer = session.observer.clone();
        let observed = session.observed.clone();

        let (tx, mut reads) = mpsc::unbounded_channel();
        let handler = move |bytes: &[u8], _conn: &ConnectionHandle| tx.send(bytes.to_vec()).unwrap();

        let mut connection = SecureConnection::with_session("example.com", 443, Box::new(session), handler);
        assert!(observer.set(connection.handle()).is_ok());
        assert_eq!(connection.state(), ConnectionState::Created);

        connection.connect_over(socket.clone()).await.unwrap();

        // two would-block steps and the completing one, all while connecting
        assert_eq!(*observed.lock().unwrap(), [ConnectionState::Connecting; 3]);
        assert_eq!(connection.state(), ConnectionState::Open);

        // armed exactly once, after the handshake
        assert!(connection.handler.is_none());
        assert!(connection.reader.is_some());
        socket.push_data(b"hello");
        assert_eq!(reads.recv().await.unwrap(), b"hello");

        connection.send(b"ping").unwrap();
        assert_eq!(socket.written(), b"ping");

        connection.close();
        assert_eq!(closes.load(Ordering::SeqCst), 101);
        connection.close();
        assert_eq!(closes.load(Ordering::SeqCst), 101);
        assert!(connection.connect_over(socket).await.is_err());
    }

    #[tokio::test]
    async fn failed_send_closes_the_connection() {
        let socket = MockSocket::new();
        let closes = Arc::new(AtomicUsize::new(0));
        let session = ScriptedSession::new([], closes.clone());
        let handler = |_bytes: &[u8], _conn: &ConnectionHandle| {};
        let mut connection = SecureConnection::with_session("example.com", 443, Box::new(session), handler);
        connection.connect_over(socket.clone()).await.unwrap();

        socket.limit_writes(2);
        assert!(matches!(connection.send(b"hello"), Err(TransportError::SendFailure { .. })));

        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(connection.handle().close_reason(), Some(CloseReason::Failed(ErrorKind::WriteZero)));
        assert_eq!(closes.load(Ordering::SeqCst), 101);
        assert!(matches!(connection.send(b"hello"), Err(TransportError::SendFailure { .. })));
        assert_eq!(socket.written(), b"he");
    }

    #[tokio::test]
    async fn close_through_shared_reference() {
        let socket = MockSocket::new();
        let closes = Arc::new(AtomicUsize::new(0));
        let session = ScriptedSession::new([], closes.clone());
        let handler = |_bytes: &[u8], _conn: &ConnectionHandle| {};
        let mut connection = SecureConnection::with_session("example.com", 443, Box::new(session), handler);
        connection.connect_over(socket).await.unwrap();

        let shared = &connection;
        let handle = shared.handle();
        shared.close();

        assert!(handle.is_closed());
        assert_eq!(handle.close_reason(), Some(CloseReason::Local));
        assert_eq!(closes.load(Ordering::SeqCst), 101);
    }

    #[tokio::test]
    async fn graceful_close_from_backend() {
        let socket = MockSocket::new();
        let closes = Arc::new(AtomicUsize::new(0));
        let session = ScriptedSession::new([], closes.clone()).then_reads([Ok(0)]);

        let (tx, mut reads) = mpsc::unbounded_channel::<Vec<u8>>();
        let handler = move |bytes: &[u8], _conn: &ConnectionHandle| tx.send(bytes.to_vec()).unwrap();
        let mut connection = SecureConnection::with_session("example.com", 443, Box::new(session), handler);

        connection.connect_over(socket.clone()).await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Open);

        socket.push_data(b"close-notify");
        connection.closed().await;

        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(connection.handle().close_reason(), Some(CloseReason::Graceful));
        assert!(reads.recv().await.is_none());
        assert!(matches!(connection.send(b"late"), Err(TransportError::SendFailure { .. })));
        assert!(matches!(connection.handle().send(b"late"), Err(TransportError::SendFailure { .. })));
        assert_eq!(closes.load(Ordering::SeqCst), 101);
    }

    #[tokio::test]
    async fn would_block_decrypt_waits_for_next_edge() {
        let socket = MockSocket::new();
        let closes = Arc::new(AtomicUsize::new(0));
        let session = ScriptedSession::new([], closes)
            .then_reads([Err(ErrorKind::WouldBlock.into())]);

        let (tx, mut reads) = mpsc::unbounded_channel();
        let handler = move |bytes: &[u8], _conn: &ConnectionHandle| tx.send(bytes.to_vec()).unwrap();
        let mut connection = SecureConnection::with_session("example.com", 443, Box::new(session), handler);
        connection.connect_over(socket.clone()).await.unwrap();

        socket.push_data(b"partial record");
        socket.push_data(b"record");

        assert_eq!(reads.recv().await.unwrap(), b"record");
        assert_eq!(connection.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn failed_handshake_closes_and_releases_session() {
        let socket = MockSocket::new();
        let closes = Arc::new(AtomicUsize::new(0));
        let session = ScriptedSession::new(
            [Handshake::WantRead, Handshake::Failed("bad certificate".into())],
            closes.clone(),
        );
        let (tx, mut reads) = mpsc::unbounded_channel::<Vec<u8>>();
        let handler = move |bytes: &[u8], _conn: &ConnectionHandle| tx.send(bytes.to_vec()).unwrap();
        let mut connection = SecureConnection::with_session("example.com", 443, Box::new(session), handler);

        // make the socket readable for the WantRead step
        socket.push_data(b"server hello");

        let result = connection.connect_over(socket.clone()).await;
        assert!(matches!(result, Err(TransportError::UnableToConnect { .. })));
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(closes.load(Ordering::SeqCst), 100);
        assert!(reads.recv().await.is_none());

        let result = connection.connect_over(socket).await;
        assert!(matches!(result, Err(TransportError::UnableToConnect { .. })));
    }

    #[tokio::test]
    async fn handshake_timeout() {
        let socket = MockSocket::new();
        let closes = Arc::new(AtomicUsize::new(0));
        let session = ScriptedSession::new([Handshake::WantRead], closes.clone());
        let handler = |_bytes: &[u8], _conn: &ConnectionHandle| {};
        let mut connection = SecureConnection::with_session("example.com", 443, Box::new(session), handler);
        connection.handshake_timeout = Some(Duration::from_millis(20));

        // nothing ever arrives
        let result = connection.connect_over(socket).await;
        assert!(matches!(result, Err(TransportError::UnableToConnect { .. })));
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(closes.load(Ordering::SeqCst), 100);
    }

    #[cfg(not(any(feature = "rustls", feature = "native-tls")))]
    #[test]
    fn unsupported_without_backend() {
        let connector = TlsConnector::builder().build();
        assert!(matches!(connector, Err(TransportError::Unsupported)));
    }
}
