//! HTTP request head decoder.
//!
//! This module decodes the request line and header section of an HTTP/1.x request
//! from raw bytes. `httparse` validates the syntax; the header section itself is not
//! copied into a map but split off the input buffer and kept in wire format as a
//! [`Headers`] block with a cold position cache.
//!
//! # Limits
//!
//! - Maximum number of headers: 64
//! - Maximum header size: 8KB
//! - Maximum body size: 4MB
//! - Only supports HTTP/1.0 and HTTP/1.1

use bytes::BytesMut;
use http::{Method, Uri, Version};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::header::scan::find_byte;
use crate::ensure;
use crate::protocol::{Headers, ParseError, Request};

/// Maximum number of headers allowed in a request
pub(crate) const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the entire header section
pub(crate) const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Maximum `Content-Length` accepted for a request body
pub(crate) const MAX_BODY_BYTES: u64 = 4 * 1024 * 1024;

/// A decoded request head together with the length of the body that follows it.
#[derive(Debug)]
pub(crate) struct RequestHead {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) version: Version,
    pub(crate) headers: Headers,
    pub(crate) content_length: u64,
}

/// Decoder for HTTP request heads implementing the [`Decoder`] trait.
#[derive(Debug)]
pub(crate) struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    type Item = RequestHead;
    type Error = ParseError;

    /// Attempts to decode a request head from the provided bytes buffer.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(head))` if a complete head was parsed; its bytes are removed from `src`
    /// - `Ok(None)` if more data is needed
    /// - `Err(ParseError)` if parsing failed
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Minimum valid HTTP request needs at least "GET / HTTP/1.1\r\n\r\n"
        if src.len() < 14 {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut req = httparse::Request::new(&mut headers);

        let parsed_result = req.parse(src).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            e => ParseError::invalid_header(e.to_string()),
        });

        let body_offset = match parsed_result? {
            Status::Complete(body_offset) => body_offset,
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                return Ok(None);
            }
        };

        trace!(head_size = body_offset, "parsed request head");
        ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::too_large_header(body_offset, MAX_HEADER_BYTES));

        let version = match req.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            // Currently HTTP/2 and HTTP/3 not supported
            _ => return Err(ParseError::InvalidVersion(req.version)),
        };

        let method = req.method.ok_or(ParseError::InvalidMethod)?;
        let method = Method::from_bytes(method.as_bytes()).map_err(|_| ParseError::InvalidMethod)?;
        let uri = req.path.ok_or(ParseError::InvalidUri)?;
        let uri = Uri::try_from(uri).map_err(|_| ParseError::InvalidUri)?;
        let content_length = parse_content_length(&method, req.headers)?;

        // httparse accepted the head, so the request line is terminated
        let line_end = find_byte(src, b'\n').map_or(body_offset, |index| index + 1);
        let rebuilt = normalize_block(&src[..body_offset], line_end, req.headers);

        let mut head = src.split_to(body_offset);
        let block = match rebuilt {
            Some(block) => block,
            None => {
                let mut block = head.split_off(line_end);
                block.truncate(block.len() - 2);
                block
            }
        };

        Ok(Some(RequestHead { method, uri, version, headers: Headers::from_bytes(block), content_length }))
    }
}

/// Rebuilds the header section as `name: value\r\n` records.
///
/// Returns `None` when the section starting at `start` already has exactly that form
/// and is followed only by the closing `\r\n`, so it can be split off without copying.
/// httparse also accepts bare `\n` line endings and any amount of whitespace around
/// values; those sections are copied into canonical records.
fn normalize_block(head: &[u8], start: usize, headers: &[httparse::Header<'_>]) -> Option<BytesMut> {
    let mut cursor = start;
    let canonical = headers.iter().all(|header| {
        let name = header.name.as_bytes();
        let value_start = cursor + name.len() + 2;
        let value_end = value_start + header.value.len();

        let matches = head.get(cursor..value_start - 2) == Some(name)
            && head.get(value_start - 2..value_start) == Some(&b": "[..])
            && head.get(value_start..value_end) == Some(header.value)
            && head.get(value_end..value_end + 2) == Some(&b"\r\n"[..]);
        cursor = value_end + 2;
        matches
    });

    if canonical && head.get(cursor..) == Some(&b"\r\n"[..]) {
        return None;
    }

    trace!("rebuilding non-canonical header section");
    let len = headers.iter().map(|header| header.name.len() + header.value.len() + 4).sum();
    let mut block = BytesMut::with_capacity(len);
    for header in headers {
        block.extend_from_slice(header.name.as_bytes());
        block.extend_from_slice(b": ");
        block.extend_from_slice(header.value);
        block.extend_from_slice(b"\r\n");
    }
    Some(block)
}

/// Determines the body length from the Content-Length and Transfer-Encoding headers.
///
/// Header names are matched ASCII case-insensitively here, as the wire format requires;
/// the [`Headers`] block itself stays byte-exact.
///
/// # Errors
///
/// Returns `ParseError` if:
/// - Both Content-Length and Transfer-Encoding headers are present
/// - Transfer-Encoding is chunked, which this layer does not decode
/// - Content-Length value is invalid or larger than [`MAX_BODY_BYTES`]
fn parse_content_length(method: &Method, headers: &[httparse::Header<'_>]) -> Result<u64, ParseError> {
    if !Request::need_body(method) {
        return Ok(0);
    }

    let find = |name: &str| headers.iter().find(|header| header.name.eq_ignore_ascii_case(name)).map(|header| header.value);

    // refer: https://www.rfc-editor.org/rfc/rfc9112.html#name-transfer-encoding
    match (find("transfer-encoding"), find("content-length")) {
        (None, None) => Ok(0),

        (Some(te_value), None) => {
            if is_chunked(te_value) {
                Err(ParseError::invalid_body("chunked request body is not supported"))
            } else {
                Ok(0)
            }
        }

        (None, Some(cl_value)) => {
            let cl_str = std::str::from_utf8(cl_value).map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;

            let length = cl_str
                .trim()
                .parse::<u64>()
                .map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;
            ensure!(
                length <= MAX_BODY_BYTES,
                ParseError::invalid_content_length(format!("value {length} exceeds the limit {MAX_BODY_BYTES}"))
            );
            Ok(length)
        }

        (Some(_), Some(_)) => Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers")),
    }
}

/// Checks if the Transfer-Encoding header indicates chunked encoding.
///
/// According to RFC 7230, chunked must be the last encoding if present.
fn is_chunked(header_value: &[u8]) -> bool {
    const CHUNKED: &[u8] = b"chunked";
    header_value.rsplit(|b| *b == b',').next().is_some_and(|bytes| bytes.trim_ascii() == CHUNKED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn check_is_chunked() {
        assert!(is_chunked(b"gzip, chunked"));
        assert!(is_chunked(b"chunked"));
        assert!(!is_chunked(b"chunked, gzip"));
        assert!(!is_chunked(b"gzip"));
    }

    #[test]
    fn test_bytes_mut_lens() {
        let str = indoc! {r##"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        123"##};

        let mut bytes = BytesMut::from(str);

        let result = HeaderDecoder.decode(&mut bytes).unwrap();

        assert!(result.is_some());
        assert_eq!(&bytes[..], &b"123"[..]);
    }

    #[test]
    fn from_curl() {
        let mut buf = BytesMut::from(
            &b"GET /index.html HTTP/1.1\r\nHost: 127.0.0.1:8080\r\nUser-Agent: curl/7.79.1\r\nAccept: */*\r\n\r\n"[..],
        );

        let head = HeaderDecoder.decode(&mut buf).unwrap().unwrap();

        assert!(buf.is_empty());
        assert_eq!(head.method, Method::GET);
        assert_eq!(head.version, Version::HTTP_11);
        assert_eq!(head.uri.path(), "/index.html");
        assert_eq!(head.uri.query(), None);
        assert_eq!(head.content_length, 0);

        assert_eq!(head.headers.as_bytes(), b"Host: 127.0.0.1:8080\r\nUser-Agent: curl/7.79.1\r\nAccept: */*\r\n");
        assert_eq!(head.headers.get("Accept").unwrap(), "*/*");
        assert_eq!(head.headers.get("Host").unwrap(), "127.0.0.1:8080");
        assert_eq!(head.headers.get("User-Agent").unwrap(), "curl/7.79.1");
    }

    #[test]
    fn from_edge() {
        let raw = [
            "GET /index/?a=1&b=2&a=3 HTTP/1.1",
            "Host: 127.0.0.1:8080",
            "Connection: keep-alive",
            "Cache-Control: max-age=0",
            r##"sec-ch-ua: "#Not_A Brand";v="99", "Microsoft Edge";v="109", "Chromium";v="109""##,
            "sec-ch-ua-mobile: ?0",
            "sec-ch-ua-platform: \"macOS\"",
            "Upgrade-Insecure-Requests: 1",
            "Accept-Encoding: gzip, deflate, br",
            "Accept-Language: zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7",
            "",
            "",
        ]
        .join("\r\n");

        let mut buf = BytesMut::from(raw.as_str());

        let head = HeaderDecoder.decode(&mut buf).unwrap().unwrap();

        assert_eq!(head.uri.path(), "/index/");
        assert_eq!(head.uri.query(), Some("a=1&b=2&a=3"));
        assert_eq!(head.headers.iter().count(), 9);

        assert_eq!(head.headers.get("Connection").unwrap(), "keep-alive");
        assert_eq!(head.headers.get("Cache-Control").unwrap(), "max-age=0");
        assert_eq!(
            head.headers.get("sec-ch-ua").unwrap(),
            r##""#Not_A Brand";v="99", "Microsoft Edge";v="109", "Chromium";v="109""##
        );
        assert_eq!(head.headers.get("sec-ch-ua-platform").unwrap(), "\"macOS\"");
        assert_eq!(head.headers.get("Accept-Language").unwrap(), "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7");
    }

    #[test]
    fn partial_head_needs_more() {
        let mut buf = BytesMut::from(&b"GET /index.html HTTP/1.1\r\nHost: 127.0.0.1"[..]);
        assert!(HeaderDecoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 41);
    }

    #[test]
    fn content_length_for_post() {
        let mut buf = BytesMut::from(&b"POST /upload HTTP/1.1\r\ncontent-length: 5\r\n\r\nhello"[..]);
        let head = HeaderDecoder.decode(&mut buf).unwrap().unwrap();

        assert_eq!(head.content_length, 5);
        assert_eq!(&buf[..], b"hello");
    }

    #[test]
    fn rejects_chunked_and_conflicting_lengths() {
        let mut chunked = BytesMut::from(&b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n"[..]);
        assert!(matches!(HeaderDecoder.decode(&mut chunked), Err(ParseError::InvalidBody { .. })));

        let mut both = BytesMut::from(&b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\nContent-Length: 3\r\n\r\n"[..]);
        assert!(matches!(HeaderDecoder.decode(&mut both), Err(ParseError::InvalidContentLength { .. })));
    }

    #[test]
    fn canonical_block_is_not_copied() {
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n"[..]);
        let start = buf.as_ptr().addr();

        let head = HeaderDecoder.decode(&mut buf).unwrap().unwrap();

        assert_eq!(head.headers.as_bytes().as_ptr().addr(), start + 16);
        assert_eq!(head.headers.get("Accept").unwrap(), "*/*");
    }

    #[test]
    fn no_space_after_colon() {
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\nHost:example.com\r\nUser-Agent: curl/8\r\n\r\n"[..]);

        let head = HeaderDecoder.decode(&mut buf).unwrap().unwrap();

        assert_eq!(head.headers.as_bytes(), b"Host: example.com\r\nUser-Agent: curl/8\r\n");
        assert_eq!(head.headers.get("Host").unwrap(), "example.com");
        assert_eq!(head.headers.get("User-Agent").unwrap(), "curl/8");
    }

    #[test]
    fn extra_whitespace_around_values() {
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\nHost:   example.com\r\nAccept:\t*/*\r\nX-Empty:\r\n\r\n"[..]);

        let head = HeaderDecoder.decode(&mut buf).unwrap().unwrap();

        assert_eq!(head.headers.get("Host").unwrap(), "example.com");
        assert_eq!(head.headers.get("Accept").unwrap(), "*/*");
        assert_eq!(head.headers.get("X-Empty").unwrap(), "");
        assert_eq!(head.headers.iter().count(), 3);
    }

    #[test]
    fn bare_lf_line_endings() {
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\nHost: example.com\nAccept: */*\n\n"[..]);

        let head = HeaderDecoder.decode(&mut buf).unwrap().unwrap();

        assert!(buf.is_empty());
        assert_eq!(head.headers.as_bytes(), b"Host: example.com\r\nAccept: */*\r\n");
        assert_eq!(head.headers.get("Host").unwrap(), "example.com");
        assert_eq!(head.headers.get("Accept").unwrap(), "*/*");
    }

    #[test]
    fn body_length_is_capped() {
        let at_limit = format!("POST / HTTP/1.1\r\nContent-Length: {MAX_BODY_BYTES}\r\n\r\n");
        let head = HeaderDecoder.decode(&mut BytesMut::from(at_limit.as_str())).unwrap().unwrap();
        assert_eq!(head.content_length, MAX_BODY_BYTES);

        let over = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", MAX_BODY_BYTES + 1);
        let result = HeaderDecoder.decode(&mut BytesMut::from(over.as_str()));
        assert!(matches!(result, Err(ParseError::InvalidContentLength { .. })));
    }

    #[test]
    fn too_large_partial_head() {
        let mut buf = BytesMut::from(format!("GET / HTTP/1.1\r\nX-Big: {}", "a".repeat(MAX_HEADER_BYTES)).as_str());
        assert!(matches!(HeaderDecoder.decode(&mut buf), Err(ParseError::TooLargeHeader { .. })));
    }
}
