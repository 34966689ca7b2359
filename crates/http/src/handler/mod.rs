//! Request handler contract.
//!
//! A [`Handler`] receives every request decoded on a connection together with the
//! connection's [`ConnectionHandle`], and answers by calling
//! [`send`](ConnectionHandle::send) itself. Returning an error closes the connection.
//!
//! ```
//! use lynx_http::connection::ConnectionHandle;
//! use lynx_http::handler::{make_handler, BoxError};
//! use lynx_http::protocol::{Request, Response};
//!
//! fn hello(request: Request, conn: &ConnectionHandle) -> Result<(), BoxError> {
//!     let response = Response::ok().with_header("Content-Type", "text/plain").with_body(request.uri().path().to_owned());
//!     conn.send(&response.to_bytes()?)?;
//!     Ok(())
//! }
//!
//! let handler = make_handler(hello);
//! ```

use std::error::Error;

use crate::connection::ConnectionHandle;
use crate::protocol::Request;

pub type BoxError = Box<dyn Error + Send + Sync>;

pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: Request, conn: &ConnectionHandle) -> Result<(), BoxError>;
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F, Err> Handler for HandlerFn<F>
where
    F: Fn(Request, &ConnectionHandle) -> Result<(), Err> + Send + Sync + 'static,
    Err: Into<BoxError>,
{
    fn call(&self, request: Request, conn: &ConnectionHandle) -> Result<(), BoxError> {
        (self.f)(request, conn).map_err(Into::into)
    }
}

pub fn make_handler<F, Err>(f: F) -> HandlerFn<F>
where
    F: Fn(Request, &ConnectionHandle) -> Result<(), Err>,
    Err: Into<BoxError>,
{
    HandlerFn { f }
}
