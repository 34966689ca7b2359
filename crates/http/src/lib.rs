//! An embeddable HTTP/1.x header engine and event-driven transport
//!
//! This crate provides the low-level layer an HTTP server or router is built on: a
//! zero-copy, mutable representation of HTTP header blocks over byte buffers, and one
//! read/write contract over plain TCP and TLS sockets, built on top of tokio.
//!
//! # Features
//!
//! - Header blocks kept in wire format, never converted into a map
//! - Hash-keyed position cache with lazy indexing of inbound headers
//! - Copy-on-write sharing of header storage between requests and responses
//! - Plain TCP and TLS transports with per-connection ordered read callbacks
//! - Pluggable TLS backend: rustls by default, or the platform library with the
//!   `native-tls` feature
//! - Request decoding and response encoding on `tokio_util` codecs
//!
//! # Example
//!
//! ```no_run
//! use lynx_http::connection::ConnectionHandle;
//! use lynx_http::handler::{make_handler, BoxError};
//! use lynx_http::protocol::{Request, Response};
//! use lynx_http::server::Server;
//! use tracing::{error, info, Level};
//! use tracing_subscriber::FmtSubscriber;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Initialize logging
//!     let subscriber = FmtSubscriber::builder()
//!         .with_max_level(Level::INFO)
//!         .finish();
//!     tracing::subscriber::set_global_default(subscriber)
//!         .expect("setting default subscriber failed");
//!
//!     let server = Server::builder()
//!         .address("127.0.0.1:8080")
//!         .handler(make_handler(hello_world))
//!         .build()
//!         .expect("invalid server configuration");
//!
//!     if let Err(e) = server.start().await {
//!         error!(cause = %e, "server stopped");
//!     }
//! }
//!
//! fn hello_world(request: Request, conn: &ConnectionHandle) -> Result<(), BoxError> {
//!     info!(path = request.uri().path(), "receiving request");
//!
//!     let response = Response::ok()
//!         .with_header("Content-Type", "text/plain")
//!         .with_body("Hello World!\r\n");
//!     conn.send(&response.to_bytes()?)?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`protocol`]: [`ByteToken`](protocol::ByteToken), [`Headers`](protocol::Headers),
//!   request/response types and errors
//! - [`codec`]: request decoding and response encoding
//! - [`connection`]: the plain and TLS transports
//! - [`tls`]: the TLS backend interface and connector
//! - [`handler`] and [`server`]: the handler contract and a minimal accept loop
//!
//! # Header blocks
//!
//! A [`Headers`](protocol::Headers) value is a sequence of `name: value\r\n` records.
//! Lookups consult a position cache first and fall back to scanning the records that have
//! not been indexed yet, so parsing an inbound block is free until a field is asked for.
//! Names are compared byte-exactly.
//!
//! # Error Handling
//!
//! - [`protocol::TransportError`]: connect, send and TLS setup failures
//! - [`protocol::ParseError`]: request parsing errors
//! - [`protocol::SendError`]: response encoding errors
//! - [`protocol::HttpError`]: top-level error type
//!
//! Peer close, reset and I/O failures are not errors: they move a connection to
//! [`ConnectionState::Closed`](connection::ConnectionState::Closed).
//!
//! # Limitations
//!
//! - HTTP/1.x only (currently HTTP/2 or HTTP/3 is not supported)
//! - No chunked request bodies
//! - TLS is client side only
//! - Maximum header size: 8KB
//! - Maximum number of headers: 64
//! - Maximum request body: 4MB

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod tls;

mod utils;
pub(crate) use utils::ensure;
