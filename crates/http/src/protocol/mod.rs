//! Core HTTP protocol types.
//!
//! This module holds the data types shared by the codec, the transports and the
//! server:
//!
//! - **Tokens**: [`ByteToken`], the byte-exact representation used for
//!   header names and values
//! - **Header blocks**: [`Headers`], a copy-on-write `name: value\r\n`
//!   block with a position cache
//! - **Messages**: [`Request`] and [`Response`]
//! - **Errors**: [`HttpError`], [`ParseError`], [`SendError`] and
//!   [`TransportError`]
//!
//! Header blocks are never converted into a map; lookups and edits operate on the
//! serialized bytes directly.

mod token;
pub use token::ByteToken;
pub use token::HeaderValue;

mod headers;
pub use headers::Headers;

mod request;
pub use request::Request;

mod response;
pub use response::Response;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
pub use error::TransportError;
