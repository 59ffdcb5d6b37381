//! Decoder for the HTTP/1.x response status line.

use bytes::BytesMut;
use http::{StatusCode, Version};
use tokio_util::codec::Decoder;

use crate::ensure;
use crate::protocol::ParseError;

const MAX_STATUS_LINE_BYTES: usize = 8 * 1024;

/// The parsed first line of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: Version,
    pub status: StatusCode,
    pub reason: String,
}

/// Decodes `HTTP/1.x CODE REASON\r\n`.
///
/// Yields `None` until a full CRLF terminated line is buffered; the consumed
/// bytes include the terminator. A malformed line is a [`ParseError`], which
/// the connection reports as a status data failure rather than an I/O one.
pub struct StatusDecoder;

impl Decoder for StatusDecoder {
    type Item = StatusLine;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(pos) = find_crlf(src) else {
            ensure!(
                src.len() <= MAX_STATUS_LINE_BYTES,
                ParseError::invalid_status_line("status line too long")
            );
            return Ok(None);
        };

        let line = src.split_to(pos + 2);
        let text = std::str::from_utf8(&line[..pos])
            .map_err(|_| ParseError::invalid_status_line("not valid utf-8"))?;

        let mut parts = text.splitn(3, ' ');

        let version = match parts.next() {
            Some("HTTP/1.1") => Version::HTTP_11,
            Some("HTTP/1.0") => Version::HTTP_10,
            other => {
                return Err(ParseError::invalid_status_line(format!(
                    "unsupported version {other:?}"
                )))
            }
        };

        let code = parts.next().ok_or_else(|| ParseError::invalid_status_line("missing code"))?;
        let status = code
            .parse::<u16>()
            .ok()
            .and_then(|c| StatusCode::from_u16(c).ok())
            .ok_or_else(|| ParseError::invalid_status_line(format!("bad status code {code}")))?;

        let reason = parts.next().unwrap_or_default().to_string();

        Ok(Some(StatusLine { version, status, reason }))
    }
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(2).position(|window| window == b"\r\n")
}
