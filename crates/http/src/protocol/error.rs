use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },

    #[error("transport error: {source}")]
    TransportError {
        #[from]
        source: TransportError,
    },
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("unsupported http version: {version:?}")]
    UnsupportedVersion { version: http::Version },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

/// Errors surfaced synchronously by the transport operations.
///
/// Connection lifecycle events (peer close, reset, I/O failure while reading) are not
/// errors of this type, they move the connection to
/// [`ConnectionState::Closed`](crate::connection::ConnectionState::Closed) instead.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("unable to connect: {reason}")]
    UnableToConnect { reason: String },

    #[error("send failure: {reason}")]
    SendFailure { reason: String },

    #[error("tls is not supported by this build")]
    Unsupported,

    #[error("cannot create tls context: {reason}")]
    CannotCreateContext { reason: String },
}

impl TransportError {
    pub fn unable_to_connect<S: ToString>(str: S) -> Self {
        Self::UnableToConnect { reason: str.to_string() }
    }

    pub fn send_failure<S: ToString>(str: S) -> Self {
        Self::SendFailure { reason: str.to_string() }
    }

    pub fn cannot_create_context<S: ToString>(str: S) -> Self {
        Self::CannotCreateContext { reason: str.to_string() }
    }
}
