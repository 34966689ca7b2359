//! State shared between a transport, its handles and its reader task.

use std::fmt;
use std::future::poll_fn;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::connection::read_buffer::ReadBuffer;
use crate::connection::socket::{classify, CloseReason, ReadOutcome};
use crate::connection::ConnectionState;
use crate::ensure;
use crate::protocol::TransportError;

/// Callback receiving the bytes of every successful read.
///
/// `bytes` borrows the connection's receive buffer and is only valid for the duration
/// of the call; copy what must outlive it. Calls for one connection never overlap, and
/// `conn.send`/`conn.close` may be called from inside the callback.
pub trait ReadHandler: Send + 'static {
    fn on_read(&mut self, bytes: &[u8], conn: &ConnectionHandle);
}

impl<F> ReadHandler for F
where
    F: FnMut(&[u8], &ConnectionHandle) + Send + 'static,
{
    fn on_read(&mut self, bytes: &[u8], conn: &ConnectionHandle) {
        self(bytes, conn)
    }
}

/// An established byte transport: plain socket or TLS session over a socket.
pub(crate) trait Link: Send {
    fn poll_read_ready(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    fn read(&mut self, buf: &mut [u8]) -> ReadOutcome;

    /// Writes all of `data` or fails.
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Best-effort orderly shutdown before the link is dropped.
    fn shutdown(&mut self);

    /// Whether a failed `write` left the stream unusable, e.g. TLS records half flushed.
    fn is_broken(&self) -> bool {
        false
    }
}

pub(crate) struct Shared {
    peer: String,
    link: Mutex<Option<Box<dyn Link>>>,
    state: watch::Sender<ConnectionState>,
    reason: OnceLock<CloseReason>,
    /// Held by the reader for the whole of a read callback.
    callback: Mutex<()>,
    /// Thread running the current read callback, if any.
    dispatcher: Mutex<Option<ThreadId>>,
}

impl Shared {
    pub(crate) fn new(peer: String, initial: ConnectionState) -> Arc<Self> {
        let (state, _) = watch::channel(initial);
        Arc::new(Self {
            peer,
            link: Mutex::new(None),
            state,
            reason: OnceLock::new(),
            callback: Mutex::new(()),
            dispatcher: Mutex::new(None),
        })
    }

    pub(crate) fn peer(&self) -> &str {
        &self.peer
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn Link>>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Moves to `next` unless the connection is already closed.
    pub(crate) fn transition(&self, next: ConnectionState) -> bool {
        let moved = self.state.send_if_modified(|state| {
            if state.is_closed() || *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if moved {
            debug!(peer = %self.peer, state = %next, "connection state changed");
        }
        moved
    }

    /// Installs the established link. Refused, and the link dropped, once closed.
    pub(crate) fn install(&self, link: Box<dyn Link>) -> bool {
        let mut guard = self.lock();
        if self.state().is_closed() {
            return false;
        }
        *guard = Some(link);
        true
    }

    /// Closes the connection. Only the first call has an effect; the link is shut down
    /// and released before this returns.
    ///
    /// Called from outside the read callback, this also waits for a callback in progress
    /// to finish, so no callback runs once it returns.
    pub(crate) fn close(&self, reason: CloseReason) {
        let first = self.state.send_if_modified(|state| {
            if state.is_closed() {
                false
            } else {
                *state = ConnectionState::Closed;
                true
            }
        });
        if !first {
            return;
        }

        let _ = self.reason.set(reason);
        let link = self.lock().take();
        if let Some(mut link) = link {
            link.shutdown();
        }

        match reason {
            CloseReason::Local | CloseReason::Graceful => debug!(peer = %self.peer, %reason, "connection closed"),
            _ => warn!(peer = %self.peer, %reason, "connection closed"),
        }

        let current = thread::current().id();
        if *self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner) != Some(current) {
            drop(self.callback.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }

    /// Runs `callback` unless the connection is closed. Returns whether it ran.
    ///
    /// The state is checked under the callback lock that `close` waits on.
    fn dispatch(&self, callback: impl FnOnce()) -> bool {
        let _running = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state().is_closed() {
            return false;
        }

        *self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread::current().id());
        callback();
        *self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner) = None;
        true
    }

    pub(crate) fn close_reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }

    pub(crate) fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let state = self.state();
        ensure!(state.is_established(), TransportError::send_failure(format!("connection is {state}")));

        let (result, broken) = match self.lock().as_mut() {
            Some(link) => {
                let result = link.write(data);
                let broken = result.is_err() && link.is_broken();
                (result, broken)
            }
            None => (Err(TransportError::send_failure("connection is not established")), false),
        };
        if broken {
            self.close(CloseReason::Failed(io::ErrorKind::WriteZero));
        }
        result
    }

    fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.lock().as_mut() {
            Some(link) => link.poll_read_ready(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn read(&self, buf: &mut [u8]) -> ReadOutcome {
        match self.lock().as_mut() {
            Some(link) => link.read(buf),
            None => ReadOutcome::Closed(CloseReason::Local),
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

/// Cloneable handle to a connection, valid from any task.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Writes `data` with one non-blocking write.
    ///
    /// Fails with [`TransportError::SendFailure`] if the transport does not accept every
    /// byte, and always fails unless the connection is `Connected` or `Open`. A failed
    /// send on a TLS connection may already have queued encrypted records, so it also
    /// closes the connection instead of allowing a retry.
    pub fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.shared.send(data)
    }

    /// Closes the connection. Idempotent; no read callback runs after it returns.
    pub fn close(&self) {
        self.shared.close(CloseReason::Local);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Why the connection closed, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.close_reason()
    }

    /// Host and port this connection talks to.
    pub fn peer(&self) -> &str {
        self.shared.peer()
    }

    /// Receiver of state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.subscribe()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut state = self.subscribe();
        // the sender lives in `self.shared`, so the channel cannot close first
        let _ = state.wait_for(ConnectionState::is_closed).await;
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle").field("peer", &self.peer()).field("state", &self.state()).finish()
    }
}

/// Spawns the reader task: the connection's exclusive execution context.
///
/// The task awaits a readiness edge, performs one read into its own [`ReadBuffer`] and
/// runs the handler to completion before awaiting the next edge. The link lock is never
/// held across an await nor while the handler runs.
pub(crate) fn arm(shared: Arc<Shared>, mut handler: Box<dyn ReadHandler>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let handle = ConnectionHandle::new(shared.clone());
        let mut state = shared.subscribe();
        let mut buffer = ReadBuffer::new();

        loop {
            tokio::select! {
                biased;
                _ = state.wait_for(ConnectionState::is_closed) => break,
                ready = poll_fn(|cx| shared.poll_read_ready(cx)) => {
                    if let Err(e) = ready {
                        shared.close(classify(&e).unwrap_or(CloseReason::Failed(e.kind())));
                        break;
                    }
                }
            }

            match shared.read(buffer.as_mut_slice()) {
                ReadOutcome::Data(n) => {
                    trace!(peer = %shared.peer(), bytes = n, "read");
                    if !shared.dispatch(|| handler.on_read(buffer.filled(n), &handle)) {
                        break;
                    }
                }
                ReadOutcome::WouldBlock => continue,
                ReadOutcome::Closed(reason) => {
                    shared.close(reason);
                    break;
                }
            }
        }

        trace!(peer = %shared.peer(), "reader stopped");
    })
}
