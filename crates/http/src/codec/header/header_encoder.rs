//! Response head encoder.
//!
//! Serializes the status line and the response's [`Headers`](crate::protocol::Headers)
//! block. The block is already in wire format, so it is copied verbatim after
//! `Content-Length` has been set to the body length.

use crate::protocol::{Response, SendError};

use bytes::{BufMut, BytesMut};

use http::Version;
use std::io;
use std::io::Write;
use tokio_util::codec::Encoder;
use tracing::error;

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 4 * 1024;

/// Encoder for HTTP response heads implementing the [`Encoder`] trait.
#[derive(Debug)]
pub(crate) struct HeaderEncoder;

impl Encoder<&Response> for HeaderEncoder {
    type Error = SendError;

    /// Encodes the status line and header block of `item` into `dst`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - HTTP version is not HTTP/1.0 or HTTP/1.1
    /// - Writing to buffer fails
    fn encode(&mut self, item: &Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let version = match item.version() {
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_11 => "HTTP/1.1",
            version => {
                error!(http_version = ?version, "unsupported http version");
                return Err(SendError::UnsupportedVersion { version });
            }
        };

        let mut headers = item.headers().clone();
        headers.insert("Content-Length", item.body().len().to_string());

        dst.reserve(INIT_HEADER_SIZE.max(headers.len_bytes() + 32));
        let status = item.status();
        write!(FastWrite(dst), "{version} {} {}\r\n", status.as_str(), status.canonical_reason().unwrap_or(""))?;

        dst.put_slice(headers.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// Fast writer implementation for writing to BytesMut.
///
/// Space has already been reserved, so writes never fail.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn status_line_and_block() {
        let response = Response::new(StatusCode::NOT_FOUND).with_header("Server", "lynx");
        let mut dst = BytesMut::new();

        HeaderEncoder.encode(&response, &mut dst).unwrap();

        assert_eq!(&dst[..], b"HTTP/1.1 404 Not Found\r\nServer: lynx\r\nContent-Length: 0\r\n\r\n");
    }

    #[test]
    fn existing_content_length_is_replaced() {
        let response = Response::ok()
            .with_header("Content-Length", "999")
            .with_header("Content-Type", "text/plain")
            .with_version(Version::HTTP_10)
            .with_body("hi");
        let mut dst = BytesMut::new();

        HeaderEncoder.encode(&response, &mut dst).unwrap();

        assert_eq!(&dst[..], b"HTTP/1.0 200 OK\r\nContent-Length: 2\r\nContent-Type: text/plain\r\n\r\n");
        // the response itself is left untouched
        assert_eq!(response.headers().get("Content-Length").unwrap(), "999");
    }

    #[test]
    fn rejects_http2() {
        let response = Response::ok().with_version(Version::HTTP_2);
        let result = HeaderEncoder.encode(&response, &mut BytesMut::new());
        assert!(matches!(result, Err(SendError::UnsupportedVersion { .. })));
    }
}
