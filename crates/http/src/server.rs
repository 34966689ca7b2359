//! Minimal accept loop.
//!
//! Every accepted socket becomes a plain [`Connection`]. Its read handler buffers the
//! incoming bytes, decodes as many requests as are complete and dispatches each to the
//! [`Handler`] in arrival order. A handler error closes the connection; a malformed
//! request is answered with `400 Bad Request` and then closed.

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use bytes::BytesMut;
use http::StatusCode;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::codec::Decoder;
use tracing::{debug, error, info, warn};

use crate::codec::RequestDecoder;
use crate::connection::{Connection, ConnectionHandle};
use crate::handler::Handler;
use crate::protocol::{HttpError, Response};

pub struct ServerBuilder {
    address: Option<Result<Vec<SocketAddr>, String>>,
    handler: Option<Arc<dyn Handler>>,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { address: None, handler: None }
    }

    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        let resolved = address.to_socket_addrs().map(Iterator::collect).map_err(|e| e.to_string());
        self.address = Some(resolved);
        self
    }

    pub fn handler(mut self, handler: impl Handler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let address = self.address.ok_or(ServerBuildError::MissingAddress)?.map_err(ServerBuildError::invalid_address)?;
        if address.is_empty() {
            return Err(ServerBuildError::invalid_address("address resolved to nothing"));
        }
        let handler = self.handler.ok_or(ServerBuildError::MissingHandler)?;
        Ok(Server { address, handler })
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder").field("address", &self.address).finish_non_exhaustive()
    }
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("address must be set")]
    MissingAddress,
    #[error("invalid address: {reason}")]
    InvalidAddress { reason: String },
    #[error("handler must be set")]
    MissingHandler,
}

impl ServerBuildError {
    fn invalid_address<S: ToString>(str: S) -> Self {
        Self::InvalidAddress { reason: str.to_string() }
    }
}

pub struct Server {
    address: Vec<SocketAddr>,
    handler: Arc<dyn Handler>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server").field("address", &self.address).finish_non_exhaustive()
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn address(&self) -> &[SocketAddr] {
        &self.address
    }

    /// Binds the configured address and serves until the task is dropped.
    ///
    /// # Errors
    ///
    /// Returns the bind error; accept errors are logged and skipped.
    pub async fn start(self) -> io::Result<()> {
        info!(address = ?self.address, "start listening");
        let tcp_listener = match TcpListener::bind(self.address.as_slice()).await {
            Ok(tcp_listener) => tcp_listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return Err(e);
            }
        };
        self.serve(tcp_listener).await;
        Ok(())
    }

    /// Serves connections accepted from an already bound listener.
    pub async fn serve(self, tcp_listener: TcpListener) {
        loop {
            let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            let handler = self.handler.clone();
            tokio::spawn(async move {
                let mut connection = Connection::from_stream(tcp_stream, remote_addr.to_string(), dispatcher(handler));
                connection.closed().await;
                info!(peer = %remote_addr, "finished process, connection shutdown");
            });
        }
    }
}

fn dispatcher(handler: Arc<dyn Handler>) -> impl FnMut(&[u8], &ConnectionHandle) + Send + 'static {
    let mut decoder = RequestDecoder::new();
    let mut pending = BytesMut::new();

    move |bytes: &[u8], conn: &ConnectionHandle| {
        pending.extend_from_slice(bytes);
        loop {
            match decoder.decode(&mut pending) {
                Ok(Some(request)) => {
                    if let Err(e) = handler.call(request, conn) {
                        error!(peer = %conn.peer(), cause = %e, "handler failed, closing connection");
                        conn.close();
                        return;
                    }
                    if conn.is_closed() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    let error = HttpError::from(e);
                    warn!(peer = %conn.peer(), cause = %error, "can't parse request");
                    if let Err(e) = reject(conn, StatusCode::BAD_REQUEST) {
                        debug!(peer = %conn.peer(), cause = %e, "can't answer malformed request");
                    }
                    conn.close();
                    return;
                }
            }
        }
    }
}

/// Answers with an empty response of `status`.
fn reject(conn: &ConnectionHandle, status: StatusCode) -> Result<(), HttpError> {
    let response = Response::new(status).to_bytes()?;
    conn.send(&response)?;
    Ok(())
}
