//! HTTP codec module for decoding requests and encoding responses
//!
//! - [`RequestDecoder`]: decodes inbound bytes into [`Request`](crate::protocol::Request)s
//!   whose header blocks stay in wire format
//! - [`ResponseEncoder`]: serializes a [`Response`](crate::protocol::Response) into
//!   the bytes handed to a connection's `send`
//!
//! Both implement the `tokio_util` codec traits, so they also work with `Framed`.
//!
//! # Example
//!
//! ```
//! use lynx_http::codec::{RequestDecoder, ResponseEncoder};
//! use lynx_http::protocol::Response;
//! use tokio_util::codec::{Decoder, Encoder};
//! use bytes::BytesMut;
//!
//! let mut decoder = RequestDecoder::new();
//! let mut request_buffer = BytesMut::from(&b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n"[..]);
//! let request = decoder.decode(&mut request_buffer).unwrap().unwrap();
//!
//! let mut encoder = ResponseEncoder::new();
//! let mut response_buffer = BytesMut::new();
//! encoder.encode(Response::ok().with_body(request.uri().path().to_owned()), &mut response_buffer).unwrap();
//! assert!(response_buffer.ends_with(b"\r\n\r\n/"));
//! ```

pub(crate) mod header;
mod request_decoder;
mod response_encoder;

pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
