//! Byte-exact tokens used for header names and header values.
//!
//! A [`ByteToken`] is an immutable, cheaply cloneable view over raw bytes backed by
//! [`Bytes`]. Equality and hashing are computed over the raw bytes only, no case
//! folding or locale handling is applied. Header names and header values share the
//! same representation, see [`HeaderValue`].

use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::ops::{Add, Range};
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};

/// An immutable, hashable byte sequence.
///
/// Tokens created from `'static` data or from a sub-range of an existing [`Bytes`]
/// buffer do not copy; all other constructors copy once.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ByteToken {
    bytes: Bytes,
}

/// Header values have exactly the same properties as header names.
pub type HeaderValue = ByteToken;

impl ByteToken {
    /// Creates an empty token.
    pub const fn new() -> Self {
        Self { bytes: Bytes::new() }
    }

    /// Creates a token pointing at static bytes, without copying.
    pub const fn from_static(bytes: &'static [u8]) -> Self {
        Self { bytes: Bytes::from_static(bytes) }
    }

    /// Copies the given slice into a new token.
    pub fn copy_from_slice(bytes: &[u8]) -> Self {
        Self { bytes: Bytes::copy_from_slice(bytes) }
    }

    /// Creates a token over `range` of `buffer`, sharing the underlying allocation.
    ///
    /// # Panics
    ///
    /// Panics when `range` is out of bounds of `buffer`, like [`Bytes::slice`].
    pub fn slice_of(buffer: &Bytes, range: Range<usize>) -> Self {
        Self { bytes: buffer.slice(range) }
    }

    /// Returns the raw bytes of this token.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the token and returns the backing buffer.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The hash used as key of the header position cache.
    ///
    /// Computed with a fixed-key hasher, so it is stable for the lifetime of the
    /// process and equal for equal bytes.
    pub fn hash_value(&self) -> u64 {
        hash_bytes(&self.bytes)
    }

    /// Returns the token as text when it is valid UTF-8.
    pub fn to_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    /// Parses the token as `T`, e.g. a `Content-Length` value as `u64`.
    ///
    /// Returns `None` when the token is not UTF-8 or `T` rejects it.
    pub fn parse<T: FromStr>(&self) -> Option<T> {
        self.to_str().and_then(|s| s.parse::<T>().ok())
    }
}

/// Hashes raw bytes the same way [`ByteToken::hash_value`] does.
pub(crate) fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

impl AsRef<[u8]> for ByteToken {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<&'static str> for ByteToken {
    fn from(value: &'static str) -> Self {
        Self::from_static(value.as_bytes())
    }
}

impl From<&'static [u8]> for ByteToken {
    fn from(value: &'static [u8]) -> Self {
        Self::from_static(value)
    }
}

impl From<String> for ByteToken {
    fn from(value: String) -> Self {
        Self { bytes: Bytes::from(value) }
    }
}

impl From<Vec<u8>> for ByteToken {
    fn from(value: Vec<u8>) -> Self {
        Self { bytes: Bytes::from(value) }
    }
}

impl From<Bytes> for ByteToken {
    fn from(bytes: Bytes) -> Self {
        Self { bytes }
    }
}

impl PartialEq<[u8]> for ByteToken {
    fn eq(&self, other: &[u8]) -> bool {
        self.bytes == other
    }
}

impl PartialEq<&str> for ByteToken {
    fn eq(&self, other: &&str) -> bool {
        self.bytes == other.as_bytes()
    }
}

/// Concatenates two tokens into a new owned token.
impl Add for ByteToken {
    type Output = ByteToken;

    fn add(self, rhs: Self) -> Self::Output {
        &self + &rhs
    }
}

impl Add for &ByteToken {
    type Output = ByteToken;

    fn add(self, rhs: Self) -> Self::Output {
        let mut buf = BytesMut::with_capacity(self.len() + rhs.len());
        buf.put_slice(&self.bytes);
        buf.put_slice(&rhs.bytes);
        ByteToken { bytes: buf.freeze() }
    }
}

impl fmt::Debug for ByteToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&String::from_utf8_lossy(&self.bytes), f)
    }
}

impl fmt::Display for ByteToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}
