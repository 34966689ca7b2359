//! Plain TCP transport.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::connection::shared::{self, Link, Shared};
use crate::connection::socket::{CloseReason, ReadOutcome, Socket};
use crate::connection::{ConnectionHandle, ConnectionState, ReadHandler};
use crate::ensure;
use crate::protocol::TransportError;

/// A plain TCP connection delivering every read to a [`ReadHandler`].
///
/// Created `Unconnected`; [`connect`](Connection::connect) moves it to `Connected` and
/// arms the reader. Dropping the connection closes it.
pub struct Connection {
    host: String,
    port: u16,
    shared: Arc<Shared>,
    handler: Option<Box<dyn ReadHandler>>,
    reader: Option<JoinHandle<()>>,
}

impl Connection {
    pub fn new(host: impl Into<String>, port: u16, handler: impl ReadHandler) -> Self {
        let host = host.into();
        let shared = Shared::new(format!("{host}:{port}"), ConnectionState::Unconnected);
        Self { host, port, shared, handler: Some(Box::new(handler)), reader: None }
    }

    /// Wraps an already connected socket, e.g. one returned by `TcpListener::accept`.
    ///
    /// The connection starts `Connected` with its reader armed, so this must be called
    /// from within a tokio runtime.
    pub fn from_stream<S: Socket>(socket: S, peer: impl Into<String>, handler: impl ReadHandler) -> Self {
        let shared = Shared::new(peer.into(), ConnectionState::Unconnected);
        let mut connection =
            Self { host: String::new(), port: 0, shared, handler: Some(Box::new(handler)), reader: None };
        connection.attach(socket);
        connection
    }

    /// Resolves the host, connects and arms the reader.
    ///
    /// # Errors
    ///
    /// [`TransportError::UnableToConnect`] on any resolver or OS failure, or when the
    /// connection is no longer `Unconnected`. A failed connect leaves it `Closed`.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        let state = self.state();
        ensure!(state == ConnectionState::Unconnected, TransportError::unable_to_connect(format!("connection is {state}")));

        let stream = match TcpStream::connect((self.host.as_str(), self.port)).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(peer = %self.shared.peer(), cause = %e, "connect failed");
                self.shared.close(CloseReason::Failed(e.kind()));
                return Err(TransportError::unable_to_connect(e));
            }
        };

        info!(peer = %self.shared.peer(), "connected");
        self.attach(stream);
        Ok(())
    }

    fn attach<S: Socket>(&mut self, socket: S) {
        if !self.shared.install(Box::new(PlainLink { socket })) {
            return;
        }
        self.shared.transition(ConnectionState::Connected);
        if let Some(handler) = self.handler.take() {
            self.reader = Some(shared::arm(self.shared.clone(), handler));
        }
    }

    /// See [`ConnectionHandle::send`].
    pub fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.shared.send(data)
    }

    /// See [`ConnectionHandle::close`].
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

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("peer", &self.shared.peer()).field("state", &self.state()).finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.close(CloseReason::Local);
    }
}

struct PlainLink<S> {
    socket: S,
}

impl<S: Socket> Link for PlainLink<S> {
    fn poll_read_ready(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.socket.poll_read_ready(cx)
    }

    fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        self.socket.try_read(buf).into()
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        match self.socket.try_write(data) {
            Ok(n) if n == data.len() => Ok(()),
            Ok(n) => Err(TransportError::send_failure(format!("partial write of {n} of {} bytes", data.len()))),
            Err(e) => Err(TransportError::send_failure(e)),
        }
    }

    fn shutdown(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::socket::mock::{Chunk, MockSocket};
    use std::io::ErrorKind;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn collector() -> (impl ReadHandler, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (move |bytes: &[u8], _conn: &ConnectionHandle| tx.send(bytes.to_vec()).unwrap(), rx)
    }

    #[tokio::test]
    async fn delivers_reads_then_closes_on_eof() {
        let socket = MockSocket::new();
        let (handler, mut reads) = collector();
        let mut connection = Connection::from_stream(socket.clone(), "mock", handler);
        assert_eq!(connection.state(), ConnectionState::Connected);

        socket.push_data(b"GET / HTTP/1.1\r\n");
        socket.push_data(b"Host: x\r\n\r\n");
        socket.push(Chunk::Eof);

        assert_eq!(reads.recv().await.unwrap(), b"GET / HTTP/1.1\r\n");
        assert_eq!(reads.recv().await.unwrap(), b"Host: x\r\n\r\n");

        connection.closed().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(connection.handle().close_reason(), Some(CloseReason::Graceful));
        assert!(reads.recv().await.is_none());
    }

    #[tokio::test]
    async fn reset_closes_connection() {
        let socket = MockSocket::new();
        let (handler, _reads) = collector();
        let mut connection = Connection::from_stream(socket.clone(), "mock", handler);

        socket.push(Chunk::Error(ErrorKind::WouldBlock));
        socket.push(Chunk::Error(ErrorKind::ConnectionReset));

        connection.closed().await;
        assert_eq!(connection.handle().close_reason(), Some(CloseReason::Reset));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let socket = MockSocket::new();
        let (handler, mut reads) = collector();
        let connection = Connection::from_stream(socket.clone(), "mock", handler);

        connection.close();
        let first = (connection.state(), connection.handle().close_reason());
        connection.close();
        connection.handle().close();
        assert_eq!((connection.state(), connection.handle().close_reason()), first);
        assert_eq!(first, (ConnectionState::Closed, Some(CloseReason::Local)));

        socket.push_data(b"late");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(reads.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let socket = MockSocket::new();
        let (handler, _reads) = collector();
        let connection = Connection::from_stream(socket.clone(), "mock", handler);

        connection.send(b"ping").unwrap();
        assert_eq!(socket.written(), b"ping");

        connection.close();
        assert!(matches!(connection.send(b"pong"), Err(TransportError::SendFailure { .. })));
        assert_eq!(socket.written(), b"ping");
    }

    #[tokio::test]
    async fn partial_write_is_a_send_failure() {
        let socket = MockSocket::new();
        let (handler, _reads) = collector();
        let connection = Connection::from_stream(socket.clone(), "mock", handler);
        socket.limit_writes(2);

        assert!(matches!(connection.send(b"hello"), Err(TransportError::SendFailure { .. })));
        assert_eq!(connection.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn callbacks_never_overlap() {
        let socket = MockSocket::new();
        let active = Arc::new(Mutex::new(false));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let flag = active.clone();
        let handler = move |bytes: &[u8], conn: &ConnectionHandle| {
            {
                let mut active = flag.lock().unwrap();
                assert!(!*active, "read callbacks overlapped");
                *active = true;
            }
            // send and close from inside the callback must not deadlock
            conn.send(bytes).unwrap();
            if bytes == b"last" {
                conn.close();
            }
            *flag.lock().unwrap() = false;
            done_tx.send(bytes.to_vec()).unwrap();
        };
        let mut connection = Connection::from_stream(socket.clone(), "mock", handler);

        for chunk in [&b"one"[..], b"two", b"three", b"last", b"never"] {
            socket.push_data(chunk);
        }

        connection.closed().await;
        let mut seen = Vec::new();
        while let Ok(bytes) = done_rx.try_recv() {
            seen.push(bytes);
        }
        assert_eq!(seen, [b"one".to_vec(), b"two".to_vec(), b"three".to_vec(), b"last".to_vec()]);
        assert_eq!(socket.written(), b"onetwothreelast");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_waits_for_running_callback() {
        let socket = MockSocket::new();
        let finished = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let mut started_tx = Some(started_tx);

        let (flag, count) = (finished.clone(), calls.clone());
        let handler = move |_bytes: &[u8], _conn: &ConnectionHandle| {
            count.fetch_add(1, Ordering::SeqCst);
            if let Some(tx) = started_tx.take() {
                let _ = tx.send(());
            }
            std::thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::SeqCst);
        };
        let mut connection = Connection::from_stream(socket.clone(), "mock", handler);

        socket.push_data(b"first");
        started_rx.await.unwrap();

        let handle = connection.handle();
        let finished_when_closed = tokio::task::spawn_blocking(move || {
            handle.close();
            finished.load(Ordering::SeqCst)
        })
        .await
        .unwrap();
        assert!(finished_when_closed, "close returned while a callback was running");

        socket.push_data(b"second");
        connection.closed().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connect_failure_never_invokes_handler() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (handler, mut reads) = collector();
        let mut connection = Connection::new("127.0.0.1", port, handler);

        assert!(matches!(connection.connect().await, Err(TransportError::UnableToConnect { .. })));
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(matches!(connection.connect().await, Err(TransportError::UnableToConnect { .. })));
        drop(connection);
        assert!(reads.recv().await.is_none());
    }

    #[tokio::test]
    async fn loopback_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");
            stream.write_all(b"pong").await.unwrap();
        });

        let (handler, mut reads) = collector();
        let mut connection = Connection::new("127.0.0.1", port, handler);
        assert_eq!(connection.state(), ConnectionState::Unconnected);

        connection.connect().await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Connected);
        connection.send(b"ping").unwrap();

        assert_eq!(reads.recv().await.unwrap(), b"pong");
        server.await.unwrap();

        // the server dropped its end
        connection.closed().await;
        assert_eq!(connection.handle().close_reason(), Some(CloseReason::Graceful));
    }
}
