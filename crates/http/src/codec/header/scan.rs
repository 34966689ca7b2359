//! Linear scanning of serialized header blocks.
//!
//! A header block is a concatenation of records, each of the form
//! `<name>": "<value>"\r\n"`. The functions here walk such a block without
//! allocating and report byte offsets into it.

/// Returns the index of the first `needle` in `haystack`.
///
/// The main loop compares four lanes per iteration and falls back to a byte-wise
/// compare for the tail.
#[inline]
pub(crate) fn find_byte(haystack: &[u8], needle: u8) -> Option<usize> {
    let mut chunks = haystack.chunks_exact(4);
    let mut offset = 0;

    for chunk in &mut chunks {
        if chunk[0] == needle {
            return Some(offset);
        }
        if chunk[1] == needle {
            return Some(offset + 1);
        }
        if chunk[2] == needle {
            return Some(offset + 2);
        }
        if chunk[3] == needle {
            return Some(offset + 3);
        }
        offset += 4;
    }

    chunks.remainder().iter().position(|b| *b == needle).map(|index| offset + index)
}

/// Byte offsets of one well-formed record, all relative to the start of the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordSpan {
    /// Start of the name, which is also the start of the record.
    pub(crate) start: usize,
    /// First byte of the value, right after `": "`.
    pub(crate) value_start: usize,
    /// Index of the terminating `\r`.
    pub(crate) value_end: usize,
}

impl RecordSpan {
    pub(crate) fn name_len(&self) -> usize {
        self.value_start - 2 - self.start
    }

    /// Exclusive end of the record, past the `\n`.
    pub(crate) fn end(&self) -> usize {
        self.value_end + 2
    }

    pub(crate) fn name<'a>(&self, block: &'a [u8]) -> &'a [u8] {
        &block[self.start..self.value_start - 2]
    }

    pub(crate) fn value<'a>(&self, block: &'a [u8]) -> &'a [u8] {
        &block[self.value_start..self.value_end]
    }
}

/// Outcome of scanning one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scan {
    Record(RecordSpan),
    /// No bytes remain after the requested position.
    End,
    /// The bytes at the requested position do not form a record.
    Malformed,
}

/// Parses the record starting at `start`.
pub(crate) fn scan_record(block: &[u8], start: usize) -> Scan {
    if start >= block.len() {
        return Scan::End;
    }

    let rest = &block[start..];
    let Some(colon) = find_byte(rest, b':') else {
        return Scan::Malformed;
    };

    // record names are never empty, never span lines and are followed by exactly ": "
    if colon == 0 || rest.get(colon + 1) != Some(&b' ') || rest[..colon].iter().any(|b| *b == b'\r' || *b == b'\n') {
        return Scan::Malformed;
    }

    let value_start = colon + 2;
    let Some(cr) = find_byte(&rest[value_start..], b'\r') else {
        return Scan::Malformed;
    };
    let value_end = value_start + cr;

    if rest.get(value_end + 1) != Some(&b'\n') {
        return Scan::Malformed;
    }

    Scan::Record(RecordSpan { start, value_start: start + value_start, value_end: start + value_end })
}

/// Iterates the well-formed records of a block, stopping at the first malformed one.
pub(crate) struct Records<'a> {
    block: &'a [u8],
    position: usize,
}

impl<'a> Records<'a> {
    pub(crate) fn new(block: &'a [u8], position: usize) -> Self {
        Self { block, position }
    }
}

impl Iterator for Records<'_> {
    type Item = RecordSpan;

    fn next(&mut self) -> Option<Self::Item> {
        match scan_record(self.block, self.position) {
            Scan::Record(span) => {
                self.position = span.end();
                Some(span)
            }
            Scan::End | Scan::Malformed => {
                self.position = self.block.len();
                None
            }
        }
    }
}
