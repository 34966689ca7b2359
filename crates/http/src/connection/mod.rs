//! Event-driven byte transports.
//!
//! Both transports own one socket, deliver every successful read to a caller-supplied
//! [`ReadHandler`] and expose the same `send`/`close` contract:
//!
//! - [`Connection`]: plain TCP
//! - [`SecureConnection`]: TLS through a [`TlsSession`](crate::tls::TlsSession)
//!
//! # Execution model
//!
//! Each connection gets one reader task. It awaits a readiness edge, performs exactly one
//! read into its 64 KiB [`READ_BUFFER_SIZE`] buffer and runs the handler to completion
//! before awaiting the next edge, so callbacks of one connection never overlap while
//! different connections proceed in parallel.
//!
//! Lifecycle events are not errors: end of stream, reset and I/O failures move the
//! connection to [`ConnectionState::Closed`] and stop the callbacks. Watch
//! [`ConnectionHandle::closed`] or [`ConnectionHandle::subscribe`] to observe them.
//!
//! # Example
//!
//! ```no_run
//! use lynx_http::connection::{Connection, ConnectionHandle};
//!
//! # async fn run() -> Result<(), lynx_http::protocol::TransportError> {
//! let mut connection = Connection::new("example.com", 80, |bytes: &[u8], _conn: &ConnectionHandle| {
//!     println!("{}", String::from_utf8_lossy(bytes));
//! });
//! connection.connect().await?;
//! connection.send(b"GET / HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n")?;
//! connection.closed().await;
//! # Ok(())
//! # }
//! ```

mod plain;
mod read_buffer;
mod secure;
mod shared;
mod socket;
mod state;

pub use plain::Connection;
pub use read_buffer::READ_BUFFER_SIZE;
pub use secure::SecureConnection;
pub use shared::{ConnectionHandle, ReadHandler};
pub use socket::{classify, CloseReason, Socket};
pub use state::ConnectionState;
