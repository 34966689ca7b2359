//! HTTP header processing.
//!
//! - [`HeaderDecoder`]: decodes a request line and header section, keeping the
//!   header section as a cold [`Headers`](crate::protocol::Headers) block
//! - [`HeaderEncoder`]: writes a status line followed by a response's header block
//!
//! The `scan` module holds the byte-level record scanner shared with
//! [`Headers`](crate::protocol::Headers).

mod header_decoder;
mod header_encoder;
pub(crate) mod scan;

pub(crate) use header_decoder::HeaderDecoder;
pub(crate) use header_decoder::RequestHead;
pub(crate) use header_encoder::HeaderEncoder;
