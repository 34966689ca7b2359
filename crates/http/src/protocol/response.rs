//! HTTP response representation.
//!
//! A [`Response`] pairs a status with a [`Headers`] block built in place, the way a
//! handler assembles it before handing it to
//! [`ResponseEncoder`](crate::codec::ResponseEncoder) or [`Response::to_bytes`].

use bytes::{Bytes, BytesMut};
use http::{StatusCode, Version};
use tokio_util::codec::Encoder;

use crate::codec::ResponseEncoder;
use crate::protocol::{HeaderValue, Headers, SendError};

#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    version: Version,
    headers: Headers,
    body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self { status, version: Version::HTTP_11, headers: Headers::new(), body: Bytes::new() }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    pub fn with_header(mut self, key: impl AsRef<[u8]>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Serializes the response into one buffer ready for `send`.
    pub fn to_bytes(&self) -> Result<Bytes, SendError> {
        let mut dst = BytesMut::new();
        ResponseEncoder::new().encode(self.clone(), &mut dst)?;
        Ok(dst.freeze())
    }
}
