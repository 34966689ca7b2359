use crate::codec::header::HeaderEncoder;
use crate::protocol::{Response, SendError};
use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;

/// Encodes a complete [`Response`]: status line, header block with
/// `Content-Length`, blank line and body.
#[derive(Debug)]
pub struct ResponseEncoder {
    header_encoder: HeaderEncoder,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Default for ResponseEncoder {
    fn default() -> Self {
        Self { header_encoder: HeaderEncoder }
    }
}

impl Encoder<Response> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.header_encoder.encode(&item, dst)?;

        let body = item.body();
        if !body.is_empty() {
            dst.reserve(body.len());
            dst.put_slice(body);
        }
        Ok(())
    }
}
