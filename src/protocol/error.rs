//! Error types for the client.
//!
//! Two layers of errors exist here:
//!
//! - [`ParseError`]: wire-level decoding failures raised by the codec layer,
//! - [`Error`]: the completion status carried by every finished [`Response`],
//!   with an [`ErrorKind`] naming the connection stage that terminated the
//!   exchange. Successful completion is reported through the same type with
//!   [`ErrorKind::Success`], so callers can always inspect `response.error()`
//!   regardless of outcome.
//!
//! [`Response`]: crate::protocol::Response

use std::fmt;
use std::io;
use thiserror::Error;

/// The stage a request terminated in.
///
/// Every kind except [`ErrorKind::Success`] corresponds to a failing terminal
/// connection state. [`ErrorKind::Canceled`] is reported only when the driver
/// task vanished before completing, which does not happen in normal operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// DNS resolution failed
    Resolve,
    /// No endpoint accepted the TCP connection
    Connect,
    /// TLS handshake failed
    Handshake,
    /// Writing the serialized request failed
    Write,
    /// I/O failure while reading the status line
    ReadStatus,
    /// The status line failed parsing
    ReadStatusData,
    /// I/O or parse failure while reading the header block
    ReadHeaders,
    /// Failure while reading a Content-Length framed body
    ReadContentLength,
    /// Failure while reading a chunk size line
    ReadChunkHeader,
    /// Failure while reading chunk data
    ReadChunkData,
    /// Failure while reading a body delimited by connection close
    ReadUntilEof,
    /// Redirect status without a usable Location header
    Redirect,
    /// The configured redirect limit was reached
    RedirectExhausted,
    /// The deadline expired before the exchange finished
    Timeout,
    /// The connection driver disappeared before fulfilling the future
    Canceled,
    /// Normal completion
    Success,
}

impl ErrorKind {
    /// Returns true for [`ErrorKind::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, ErrorKind::Success)
    }

    fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Resolve => "resolve error",
            ErrorKind::Connect => "connect error",
            ErrorKind::Handshake => "handshake error",
            ErrorKind::Write => "write error",
            ErrorKind::ReadStatus => "read status error",
            ErrorKind::ReadStatusData => "read status data error",
            ErrorKind::ReadHeaders => "read headers error",
            ErrorKind::ReadContentLength => "read content length error",
            ErrorKind::ReadChunkHeader => "read chunk header error",
            ErrorKind::ReadChunkData => "read chunk data error",
            ErrorKind::ReadUntilEof => "read until eof error",
            ErrorKind::Redirect => "redirect error",
            ErrorKind::RedirectExhausted => "redirect exhausted",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Canceled => "canceled",
            ErrorKind::Success => "success",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion status of a request: the terminating stage plus a message.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Creates an error with the given kind and message.
    pub fn new<S: ToString>(kind: ErrorKind, message: S) -> Self {
        Self { kind, message: message.to_string() }
    }

    /// The success value reported by completed exchanges.
    pub fn success() -> Self {
        Self::new(ErrorKind::Success, "success")
    }

    /// Returns the terminating stage.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the human readable detail message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns true when the exchange completed normally.
    pub fn is_success(&self) -> bool {
        self.kind.is_success()
    }
}

/// Errors raised while decoding the wire response.
#[derive(Error, Debug)]
pub enum ParseError {
    /// The status line is not a valid HTTP/1.x status line
    #[error("invalid status line: {reason}")]
    InvalidStatusLine { reason: String },

    /// Header block size exceeds the maximum allowed size
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    /// Invalid header format or content
    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    /// Invalid Content-Length header
    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    /// I/O error during parsing
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    /// Creates a new InvalidStatusLine error
    pub fn invalid_status_line<S: ToString>(str: S) -> Self {
        Self::InvalidStatusLine { reason: str.to_string() }
    }

    /// Creates a new TooLargeHeader error
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    /// Creates a new InvalidHeader error
    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    /// Creates a new InvalidContentLength error
    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    /// Creates a new I/O error
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
