//! Mutable HTTP header blocks operating directly on their serialized bytes.
//!
//! [`Headers`] keeps the block exactly as it appears on the wire, a concatenation of
//! `name: value\r\n` records, and never materializes a map. Lookups are answered from
//! a position cache (`hash -> record offset`) when possible and by a linear scan of
//! the block otherwise.
//!
//! # Position cache
//!
//! The cache is an insertion-ordered list of `(hash, offset)` entries together with an
//! indexing watermark. Every record that starts before the watermark is cached, except
//! records repeating the name of an earlier record. A cache miss therefore only needs to
//! scan the bytes after the watermark. Cold blocks (parsed from the network) start
//! with an empty cache and a watermark of zero; [`Headers::set`] and
//! [`Headers::index_all`] advance it.
//!
//! Every mutation that changes the length of the block repairs the offsets of all
//! surviving entries, so each cached offset always points at the first byte of its
//! record's name in the current block.
//!
//! # Sharing
//!
//! Cloning a [`Headers`] shares the storage. The first mutation through a shared handle
//! copies the block and its cache, other holders never observe the change.

use std::fmt;
use std::ops::Range;

use bytes::BytesMut;
use tracing::warn;
use triomphe::Arc;

use crate::codec::header::scan::{self, RecordSpan, Records, Scan};
use crate::protocol::token::{ByteToken, HeaderValue, hash_bytes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheEntry {
    hash: u64,
    offset: usize,
}

#[derive(Debug, Clone, Default)]
struct Storage {
    serialized: BytesMut,
    cache: Vec<CacheEntry>,
    /// Every record starting before this offset has been visited by the indexer.
    indexed: usize,
}

/// Result of a position cache lookup.
enum Lookup {
    Hit(RecordSpan),
    /// A cached entry matched but no longer describes a complete record.
    Stale,
    Miss,
}

impl Storage {
    fn name_at(&self, offset: usize, name: &[u8]) -> bool {
        let end = offset + name.len();
        self.serialized.get(offset..end) == Some(name) && self.serialized.get(end..end + 2) == Some(&b": "[..])
    }

    fn is_cached(&self, name: &[u8], hash: u64) -> bool {
        self.cache.iter().any(|entry| entry.hash == hash && self.name_at(entry.offset, name))
    }

    fn lookup(&self, key: &[u8], hash: u64) -> Lookup {
        for entry in self.cache.iter().filter(|entry| entry.hash == hash) {
            if !self.name_at(entry.offset, key) {
                // equal hash, different name
                continue;
            }

            let value_start = entry.offset + key.len() + 2;
            if value_start >= self.serialized.len() {
                return Lookup::Stale;
            }

            return match scan::find_byte(&self.serialized[value_start..], b'\r') {
                Some(cr) => Lookup::Hit(RecordSpan { start: entry.offset, value_start, value_end: value_start + cr }),
                None => Lookup::Stale,
            };
        }

        Lookup::Miss
    }

    /// Scans the records after the watermark without touching the cache.
    fn scan_unindexed(&self, key: &[u8]) -> Option<RecordSpan> {
        let mut position = self.indexed;
        loop {
            match scan::scan_record(&self.serialized, position) {
                Scan::Record(span) if span.name(&self.serialized) == key => return Some(span),
                Scan::Record(span) => position = span.end(),
                Scan::End | Scan::Malformed => return None,
            }
        }
    }

    fn find(&self, key: &[u8]) -> Option<RecordSpan> {
        match self.lookup(key, hash_bytes(key)) {
            Lookup::Hit(span) => Some(span),
            Lookup::Stale => None,
            Lookup::Miss => self.scan_unindexed(key),
        }
    }

    /// Indexes records after the watermark, stopping after the record named `until`.
    ///
    /// With `until == None` every well-formed record is indexed.
    fn index(&mut self, until: Option<&[u8]>) -> Option<RecordSpan> {
        loop {
            let span = match scan::scan_record(&self.serialized, self.indexed) {
                Scan::Record(span) => span,
                Scan::End | Scan::Malformed => return None,
            };

            let name = span.name(&self.serialized);
            let hash = hash_bytes(name);
            let found = until == Some(name);
            if !self.is_cached(name, hash) {
                self.cache.push(CacheEntry { hash, offset: span.start });
            }
            self.indexed = span.end();

            if found {
                return Some(span);
            }
        }
    }

    fn locate(&mut self, key: &[u8]) -> Option<RecordSpan> {
        match self.lookup(key, hash_bytes(key)) {
            Lookup::Hit(span) => Some(span),
            Lookup::Stale => None,
            Lookup::Miss => self.index(Some(key)),
        }
    }

    fn replace_value(&mut self, span: RecordSpan, value: &[u8]) {
        splice(&mut self.serialized, span.value_start..span.value_end, value);

        let old_len = span.value_end - span.value_start;
        if value.len() == old_len {
            return;
        }

        // every offset after the edited value moves by the length delta
        let shift = |offset: usize| {
            if offset > span.value_start { offset + value.len() - old_len } else { offset }
        };
        for entry in &mut self.cache {
            entry.offset = shift(entry.offset);
        }
        self.indexed = shift(self.indexed);
    }

    /// Removes the record described by `span` and every other record with the same name.
    fn remove_all(&mut self, span: RecordSpan) {
        let name = span.name(&self.serialized).to_vec();

        let mut removed: Vec<Range<usize>> = Records::new(&self.serialized, 0)
            .filter(|record| record.name(&self.serialized) == name.as_slice())
            .map(|record| record.start..record.end())
            .collect();
        if !removed.iter().any(|range| range.start == span.start) {
            removed.push(span.start..span.end());
            removed.sort_by_key(|range| range.start);
        }

        for range in removed.iter().rev() {
            splice(&mut self.serialized, range.clone(), &[]);
        }

        let removed_before = |offset: usize| -> usize {
            removed.iter().filter(|range| range.end <= offset).map(|range| range.end - range.start).sum()
        };

        self.cache.retain(|entry| !removed.iter().any(|range| range.start == entry.offset));
        for entry in &mut self.cache {
            entry.offset -= removed_before(entry.offset);
        }
        self.indexed -= removed_before(self.indexed);
    }

    fn append(&mut self, key: &[u8], value: &[u8]) {
        let offset = self.serialized.len();
        self.serialized.reserve(key.len() + value.len() + 4);
        self.serialized.extend_from_slice(key);
        self.serialized.extend_from_slice(b": ");
        self.serialized.extend_from_slice(value);
        self.serialized.extend_from_slice(b"\r\n");

        self.cache.push(CacheEntry { hash: hash_bytes(key), offset });
        if self.indexed == offset {
            self.indexed = self.serialized.len();
        }
    }
}

fn is_valid_name(name: &[u8]) -> bool {
    !name.is_empty() && !name.iter().any(|b| matches!(b, b':' | b' ' | b'\t' | b'\r' | b'\n' | b'\0'))
}

fn sanitize_value(value: HeaderValue) -> HeaderValue {
    let is_break = |b: &u8| matches!(b, b'\r' | b'\n' | b'\0');
    if !value.as_bytes().iter().any(is_break) {
        return value;
    }
    let cleaned: Vec<u8> = value.as_bytes().iter().map(|b| if is_break(b) { b' ' } else { *b }).collect();
    HeaderValue::from(cleaned)
}

/// Replaces `range` of `buf` with `with`, shifting the tail.
fn splice(buf: &mut BytesMut, range: Range<usize>, with: &[u8]) {
    let tail = buf.split_off(range.end);
    buf.truncate(range.start);
    buf.extend_from_slice(with);
    buf.extend_from_slice(&tail);
}

/// A copy-on-write HTTP header block.
///
/// ```
/// use lynx_http::protocol::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Length", "5");
/// assert_eq!(headers.get("Content-Length").unwrap(), "5");
///
/// headers.remove("Content-Length");
/// assert!(headers.get("Content-Length").is_none());
/// ```
#[derive(Clone, Default)]
pub struct Headers {
    storage: Arc<Storage>,
}

impl Headers {
    /// Creates an empty header block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a serialized block received from the network.
    ///
    /// The block is taken as-is and is not validated, malformed records only make
    /// the lookups that reach them return `None`. The position cache starts empty.
    pub fn from_bytes(serialized: impl Into<BytesMut>) -> Self {
        Self { storage: Arc::new(Storage { serialized: serialized.into(), cache: Vec::new(), indexed: 0 }) }
    }

    /// Returns the value of the first record named `key`.
    ///
    /// Names are compared byte-exactly.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Option<HeaderValue> {
        self.get_ref(key).map(ByteToken::copy_from_slice)
    }

    /// Like [`Headers::get`] but borrows the value from the block.
    pub fn get_ref(&self, key: impl AsRef<[u8]>) -> Option<&[u8]> {
        let storage = &*self.storage;
        storage.find(key.as_ref()).map(|span| span.value(&storage.serialized))
    }

    pub fn contains(&self, key: impl AsRef<[u8]>) -> bool {
        self.get_ref(key).is_some()
    }

    /// Sets `key` to `value`, or removes every record named `key` when `value` is `None`.
    ///
    /// An existing record is edited in place, a new one is appended to the block.
    ///
    /// Every CR, LF or NUL in `value` is replaced with a space, as RFC 9110 section 5.5
    /// allows, so a value never ends its record early. A `key` that is empty or contains
    /// `:`, whitespace, CR, LF or NUL cannot form a record and is ignored.
    pub fn set(&mut self, key: impl AsRef<[u8]>, value: Option<HeaderValue>) {
        let key = key.as_ref();
        if !is_valid_name(key) {
            warn!(name = %String::from_utf8_lossy(key), "ignoring header with invalid name");
            return;
        }
        let value = value.map(sanitize_value);
        let storage = Arc::make_mut(&mut self.storage);

        match (storage.locate(key), value) {
            (Some(span), Some(value)) => storage.replace_value(span, value.as_bytes()),
            (Some(span), None) => storage.remove_all(span),
            (None, Some(value)) => storage.append(key, value.as_bytes()),
            (None, None) => {}
        }
    }

    pub fn insert(&mut self, key: impl AsRef<[u8]>, value: impl Into<HeaderValue>) {
        self.set(key, Some(value.into()));
    }

    pub fn remove(&mut self, key: impl AsRef<[u8]>) {
        self.set(key, None);
    }

    /// Indexes every well-formed record so later lookups are answered from the cache.
    pub fn index_all(&mut self) {
        let storage = &*self.storage;
        if !matches!(scan::scan_record(&storage.serialized, storage.indexed), Scan::Record(_)) {
            return;
        }
        Arc::make_mut(&mut self.storage).index(None);
    }

    /// Iterates `(name, value)` pairs in block order, stopping at the first malformed record.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        let block = &self.storage.serialized[..];
        Records::new(block, 0).map(move |span| (span.name(block), span.value(block)))
    }

    /// The serialized block.
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage.serialized
    }

    pub fn len_bytes(&self) -> usize {
        self.storage.serialized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.serialized.is_empty()
    }

    #[cfg(test)]
    fn cached_offsets(&self) -> Vec<usize> {
        self.storage.cache.iter().map(|entry| entry.offset).collect()
    }

    #[cfg(test)]
    fn shares_storage_with(&self, other: &Headers) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: AsRef<[u8]>,
    V: Into<HeaderValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (key, value) in iter {
            headers.insert(key, value);
        }
        headers
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&String::from_utf8_lossy(self.as_bytes()), f)
    }
}

/// Builds [`Headers`] from `name => value` pairs.
///
/// ```
/// use lynx_http::headers;
///
/// let headers = headers! {
///     "Content-Type" => "text/plain",
///     "Content-Length" => "12",
/// };
/// assert_eq!(headers.as_bytes(), b"Content-Type: text/plain\r\nContent-Length: 12\r\n");
/// ```
#[macro_export]
macro_rules! headers {
    () => {
        $crate::protocol::Headers::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut headers = $crate::protocol::Headers::new();
        $(headers.insert($key, $value);)+
        headers
    }};
}
