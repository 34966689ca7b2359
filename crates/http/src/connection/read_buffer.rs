/// Size of the per-connection receive buffer
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Fixed-capacity receive buffer owned by one connection's reader task.
///
/// Every read overwrites it from the start; the filled prefix is only lent to the read
/// handler for the duration of one call.
pub(crate) struct ReadBuffer {
    buf: Box<[u8]>,
}

impl ReadBuffer {
    pub(crate) fn new() -> Self {
        Self { buf: vec![0; READ_BUFFER_SIZE].into_boxed_slice() }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    pub(crate) fn filled(&self, n: usize) -> &[u8] {
        &self.buf[..n.min(self.buf.len())]
    }
}
