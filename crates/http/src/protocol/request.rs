//! HTTP request handling implementation.
//!
//! A [`Request`] is produced by [`RequestDecoder`](crate::codec::RequestDecoder) from the
//! bytes delivered to a connection's read handler. Its header block is kept in wire
//! format as a cold [`Headers`].

use bytes::Bytes;
use http::{Method, Uri, Version};

use crate::protocol::Headers;

/// A decoded HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: Headers,
    body: Bytes,
}

impl Request {
    pub fn new(method: Method, uri: Uri, version: Version, headers: Headers, body: Bytes) -> Self {
        Self { method, uri, version, headers, body }
    }

    /// Returns a reference to the request's HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns a reference to the request's URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the request's HTTP version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the request's header block.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Determines if this request may carry a body based on its HTTP method.
    ///
    /// Returns false for methods that typically don't have bodies:
    /// - GET
    /// - HEAD
    /// - DELETE
    /// - OPTIONS
    /// - CONNECT
    pub fn need_body(method: &Method) -> bool {
        !matches!(method, &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT)
    }
}
