//! HTTP request decoder module
//!
//! Decodes complete requests out of a growing byte buffer. Decoding happens in two
//! phases: the request head is parsed by [`HeaderDecoder`], then the decoder waits
//! until `Content-Length` body bytes are buffered.
//!
//! # Example
//!
//! ```
//! use lynx_http::codec::RequestDecoder;
//! use tokio_util::codec::Decoder;
//! use bytes::BytesMut;
//!
//! let mut decoder = RequestDecoder::new();
//! let mut buffer = BytesMut::from(&b"GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n"[..]);
//!
//! let request = decoder.decode(&mut buffer).unwrap().unwrap();
//! assert_eq!(request.uri().path(), "/hello");
//! assert_eq!(request.headers().get("Host").unwrap(), "localhost");
//! ```

use crate::codec::header::{HeaderDecoder, RequestHead};
use crate::protocol::{ParseError, Request};
use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::trace;

/// Upper bound for speculative buffer growth while waiting for a body
const MAX_BODY_RESERVE: usize = 64 * 1024;

/// A decoder for HTTP requests that handles both the head and a sized body
///
/// # State Machine
///
/// The decoder maintains its state through the `pending` field:
/// - `None`: Currently parsing a request head
/// - `Some(RequestHead)`: Head parsed, waiting for the body bytes
#[derive(Debug)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    pending: Option<RequestHead>,
}

impl RequestDecoder {
    /// Creates a new `RequestDecoder` instance
    pub fn new() -> Self {
        Default::default()
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self { header_decoder: HeaderDecoder, pending: None }
    }
}

impl Decoder for RequestDecoder {
    type Item = Request;
    type Error = ParseError;

    /// Attempts to decode an HTTP request from the provided buffer
    ///
    /// # Returns
    ///
    /// - `Ok(Some(request))`: a complete request was consumed from `src`
    /// - `Ok(None)`: need more data to proceed
    /// - `Err(_)`: encountered a parsing error
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let head = match self.pending.take() {
            Some(head) => head,
            None => match self.header_decoder.decode(src)? {
                Some(head) => head,
                None => return Ok(None),
            },
        };

        let body_len = usize::try_from(head.content_length)
            .map_err(|_| ParseError::invalid_content_length(format!("value {} is too large", head.content_length)))?;

        if src.len() < body_len {
            trace!(buffered = src.len(), expected = body_len, "waiting for request body");
            src.reserve((body_len - src.len()).min(MAX_BODY_RESERVE));
            self.pending = Some(head);
            return Ok(None);
        }

        let body = src.split_to(body_len).freeze();
        let RequestHead { method, uri, version, headers, .. } = head;
        Ok(Some(Request::new(method, uri, version, headers, body)))
    }
}
