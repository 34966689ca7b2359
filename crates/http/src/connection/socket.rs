//! The non-blocking socket seam shared by both transports.
//!
//! [`Socket`] is the readiness-plus-`try_*` subset of [`tokio::net::TcpStream`]
//! the transports rely on: await a readiness edge, then perform exactly one
//! non-blocking read or write. Any type offering the same contract can carry a
//! connection, which is how the transports are tested in memory.

use std::fmt;
use std::io;
use std::io::ErrorKind;
use std::task::{Context, Poll};

use tokio::net::TcpStream;

/// A connected, non-blocking byte stream driven by readiness edges.
pub trait Socket: Send + Sync + 'static {
    /// Polls until the socket may be readable.
    fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    /// Polls until the socket may be writable.
    fn poll_write_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    /// One non-blocking read. `Ok(0)` is end of stream, `WouldBlock` clears the readiness.
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// One non-blocking write, returning how many bytes the OS accepted.
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;
}

impl Socket for TcpStream {
    fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        TcpStream::poll_read_ready(self, cx)
    }

    fn poll_write_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        TcpStream::poll_write_ready(self, cx)
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }
}

/// Why a connection reached [`ConnectionState::Closed`](super::ConnectionState::Closed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called or the connection was dropped.
    Local,
    /// The peer shut the stream down (end of file, TLS close-notify).
    Graceful,
    /// The peer reset or aborted the connection.
    Reset,
    /// Any other I/O failure, fatal for this connection.
    Failed(ErrorKind),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Local => f.write_str("closed locally"),
            CloseReason::Graceful => f.write_str("closed by peer"),
            CloseReason::Reset => f.write_str("reset by peer"),
            CloseReason::Failed(kind) => write!(f, "i/o failure: {kind}"),
        }
    }
}

/// Maps an OS error to the connection lifecycle.
///
/// Returns `None` for the retryable kinds: the read is abandoned and the next readiness
/// edge is awaited.
pub fn classify(error: &io::Error) -> Option<CloseReason> {
    match error.kind() {
        ErrorKind::WouldBlock | ErrorKind::Interrupted => None,
        ErrorKind::UnexpectedEof | ErrorKind::NotFound => Some(CloseReason::Graceful),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => Some(CloseReason::Reset),
        kind => Some(CloseReason::Failed(kind)),
    }
}

/// The result of one read attempt on a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    Data(usize),
    WouldBlock,
    Closed(CloseReason),
}

impl From<io::Result<usize>> for ReadOutcome {
    fn from(result: io::Result<usize>) -> Self {
        match result {
            Ok(0) => ReadOutcome::Closed(CloseReason::Graceful),
            Ok(n) => ReadOutcome::Data(n),
            Err(e) => match classify(&e) {
                None => ReadOutcome::WouldBlock,
                Some(reason) => ReadOutcome::Closed(reason),
            },
        }
    }
}

/// Blocking-style `Read + Write` view of a non-blocking [`Socket`], handed to TLS backends.
///
/// Every call maps to exactly one `try_read`/`try_write`, so `WouldBlock` surfaces to the
/// caller unchanged.
pub(crate) struct SocketIo<'a, S: ?Sized>(pub(crate) &'a S);

impl<S: Socket + ?Sized> io::Read for SocketIo<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf)
    }
}

impl<S: Socket + ?Sized> io::Write for SocketIo<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory [`Socket`] with scripted reads and recorded writes.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::task::Waker;

    #[derive(Debug)]
    pub(crate) enum Chunk {
        Data(Vec<u8>),
        Error(ErrorKind),
        Eof,
    }

    #[derive(Default)]
    struct Inner {
        reads: VecDeque<Chunk>,
        written: Vec<u8>,
        write_limit: Option<usize>,
        waker: Option<Waker>,
    }

    /// Cloneable handle to one in-memory socket; clones observe the same state.
    #[derive(Clone, Default)]
    pub(crate) struct MockSocket {
        inner: Arc<Mutex<Inner>>,
    }

    impl MockSocket {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn push(&self, chunk: Chunk) {
            let mut inner = self.inner.lock().unwrap();
            inner.reads.push_back(chunk);
            if let Some(waker) = inner.waker.take() {
                waker.wake();
            }
        }

        pub(crate) fn push_data(&self, data: &[u8]) {
            self.push(Chunk::Data(data.to_vec()));
        }

        /// Caps how many bytes each `try_write` accepts.
        pub(crate) fn limit_writes(&self, limit: usize) {
            self.inner.lock().unwrap().write_limit = Some(limit);
        }

        pub(crate) fn written(&self) -> Vec<u8> {
            self.inner.lock().unwrap().written.clone()
        }
    }

    impl Socket for MockSocket {
        fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            let mut inner = self.inner.lock().unwrap();
            if inner.reads.is_empty() {
                inner.waker = Some(cx.waker().clone());
                Poll::Pending
            } else {
                Poll::Ready(Ok(()))
            }
        }

        fn poll_write_ready(&self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
            let mut inner = self.inner.lock().unwrap();
            match inner.reads.pop_front() {
                None => Err(ErrorKind::WouldBlock.into()),
                Some(Chunk::Eof) => Ok(0),
                Some(Chunk::Error(kind)) => Err(kind.into()),
                Some(Chunk::Data(mut data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        inner.reads.push_front(Chunk::Data(data.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }

        fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
            let mut inner = self.inner.lock().unwrap();
            let n = inner.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
            inner.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }
    }
}
