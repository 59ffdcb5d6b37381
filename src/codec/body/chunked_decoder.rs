//! Decoder for chunked transfer encoding
//! ([RFC 7230 Section 4.1](https://tools.ietf.org/html/rfc7230#section-4.1)).
//!
//! Each chunk is a hexadecimal size line (optionally followed by extensions),
//! CRLF, the chunk data, and a trailing CRLF. A zero size line terminates the
//! body, optionally followed by trailer fields and a final CRLF.

use std::cmp;
use std::io;
use std::io::ErrorKind;

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{ParseError, PayloadItem};

/// Incremental chunked body decoder.
///
/// One call to [`Decoder::decode`] yields at most one event: a piece of
/// chunk data as soon as it is buffered (a single chunk may be delivered in
/// several pieces), or [`PayloadItem::Eof`] once the terminating zero chunk
/// has been consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    /// Bytes of the current chunk not yet delivered.
    remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Accumulating hex digits of the size line
    Size,
    /// Skipping whitespace and extensions after the size
    Extension,
    /// Expecting LF closing the size line
    SizeLf,
    /// Delivering chunk data
    Data,
    /// Expecting CR after chunk data
    DataCr,
    /// Expecting LF after chunk data
    DataLf,
    /// Expecting CR of the final CRLF, or the start of a trailer field
    EndCr,
    /// Skipping a trailer field
    Trailer,
    /// Expecting LF closing a trailer field
    TrailerLf,
    /// Expecting the final LF
    EndLf,
    /// Terminating chunk fully consumed
    Done,
}

impl ChunkedDecoder {
    /// Creates a decoder positioned at the first size line.
    pub fn new() -> Self {
        Self { state: ChunkedState::Size, remaining: 0 }
    }

    /// Bytes still owed for the chunk currently being read. Zero while a
    /// size line is being parsed.
    pub(crate) fn remaining(&self) -> u64 {
        self.remaining
    }

    /// True while chunk data bytes are outstanding. An EOF in this phase is
    /// a truncated body; an EOF between chunks is tolerated by the caller.
    pub(crate) fn reading_data(&self) -> bool {
        self.state == ChunkedState::Data
    }

    fn step(&mut self, byte: u8) -> Result<ChunkedState, io::Error> {
        use ChunkedState::*;

        Ok(match self.state {
            Size => match byte {
                b'0'..=b'9' => self.push_size_digit(byte - b'0')?,
                b'a'..=b'f' => self.push_size_digit(byte - b'a' + 10)?,
                b'A'..=b'F' => self.push_size_digit(byte - b'A' + 10)?,
                b'\t' | b' ' | b';' => Extension,
                b'\r' => SizeLf,
                _ => return Err(invalid("invalid chunk size")),
            },
            // extensions are ignored, but a bare LF inside one is rejected
            Extension => match byte {
                b'\r' => SizeLf,
                b'\n' => return Err(invalid("invalid chunk extension contains newline")),
                _ => Extension,
            },
            SizeLf => match byte {
                b'\n' if self.remaining == 0 => EndCr,
                b'\n' => Data,
                _ => return Err(invalid("invalid chunk size LF")),
            },
            DataCr => match byte {
                b'\r' => DataLf,
                _ => return Err(invalid("invalid chunk body CR")),
            },
            DataLf => match byte {
                b'\n' => Size,
                _ => return Err(invalid("invalid chunk body LF")),
            },
            EndCr => match byte {
                b'\r' => EndLf,
                _ => Trailer,
            },
            Trailer => match byte {
                b'\r' => TrailerLf,
                _ => Trailer,
            },
            TrailerLf => match byte {
                b'\n' => EndCr,
                _ => return Err(invalid("invalid trailer LF")),
            },
            EndLf => match byte {
                b'\n' => Done,
                _ => return Err(invalid("invalid chunk end LF")),
            },
            // Data and Done never reach the byte stepper
            Data | Done => unreachable!("stepped while delivering data"),
        })
    }

    fn push_size_digit(&mut self, digit: u8) -> Result<ChunkedState, io::Error> {
        self.remaining = self
            .remaining
            .checked_mul(16)
            .and_then(|size| size.checked_add(digit as u64))
            .ok_or_else(|| invalid("chunk length overflow"))?;
        Ok(ChunkedState::Size)
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                ChunkedState::Done => {
                    trace!("finished reading chunked data");
                    return Ok(Some(PayloadItem::Eof));
                }
                ChunkedState::Data => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let take = cmp::min(self.remaining, src.len() as u64) as usize;
                    let bytes = src.split_to(take).freeze();
                    self.remaining -= bytes.len() as u64;
                    if self.remaining == 0 {
                        self.state = ChunkedState::DataCr;
                    }
                    trace!(len = bytes.len(), "read chunked bytes");
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }
                _ => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let byte = src[0];
                    self.state = self.step(byte).map_err(ParseError::io)?;
                    let _ = src.split_to(1);
                }
            }
        }
    }
}

fn invalid(reason: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidInput, reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(decoder: &mut ChunkedDecoder, buffer: &mut BytesMut) -> (Vec<u8>, bool) {
        let mut body = Vec::new();
        loop {
            match decoder.decode(buffer).unwrap() {
                Some(PayloadItem::Chunk(bytes)) => body.extend_from_slice(&bytes),
                Some(PayloadItem::Eof) => return (body, true),
                None => return (body, false),
            }
        }
    }

    #[test]
    fn single_chunk() {
        let mut buffer = BytesMut::from(&b"5\r\nhello\r\n0\r\n\r\n"[..]);
        let (body, eof) = collect(&mut ChunkedDecoder::new(), &mut buffer);
        assert_eq!(body, b"hello");
        assert!(eof);
    }

    #[test]
    fn multiple_chunks() {
        let mut buffer = BytesMut::from(&b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n"[..]);
        let (body, eof) = collect(&mut ChunkedDecoder::new(), &mut buffer);
        assert_eq!(body, b"hello world");
        assert!(eof);
    }

    #[test]
    fn uppercase_hex_size() {
        let mut buffer = BytesMut::from(&b"A\r\n0123456789\r\n0\r\n\r\n"[..]);
        let (body, eof) = collect(&mut ChunkedDecoder::new(), &mut buffer);
        assert_eq!(body.len(), 10);
        assert!(eof);
    }

    #[test]
    fn chunk_with_extension() {
        let mut buffer = BytesMut::from(&b"5;ext=value\r\nhello\r\n0\r\n\r\n"[..]);
        let (body, eof) = collect(&mut ChunkedDecoder::new(), &mut buffer);
        assert_eq!(body, b"hello");
        assert!(eof);
    }

    #[test]
    fn trailers_are_skipped() {
        let mut buffer = BytesMut::from(&b"5\r\nhello\r\n0\r\nTrailer: v\r\n\r\n"[..]);
        let (body, eof) = collect(&mut ChunkedDecoder::new(), &mut buffer);
        assert_eq!(body, b"hello");
        assert!(eof);
    }

    #[test]
    fn zero_chunk_only() {
        let mut buffer = BytesMut::from(&b"0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();
        let item = decoder.decode(&mut buffer).unwrap().unwrap();
        assert!(item.is_eof());
    }

    #[test]
    fn partial_chunk_delivered_incrementally() {
        let mut decoder = ChunkedDecoder::new();
        let mut buffer = BytesMut::from(&b"5\r\nhel"[..]);

        let (body, eof) = collect(&mut decoder, &mut buffer);
        assert_eq!(body, b"hel");
        assert!(!eof);
        assert!(decoder.reading_data());
        assert_eq!(decoder.remaining(), 2);

        buffer.extend_from_slice(b"lo\r\n0\r\n\r\n");
        let (rest, eof) = collect(&mut decoder, &mut buffer);
        assert_eq!(rest, b"lo");
        assert!(eof);
    }

    #[test]
    fn between_chunks_is_not_reading_data() {
        let mut decoder = ChunkedDecoder::new();
        let mut buffer = BytesMut::from(&b"5\r\nhello\r\n"[..]);
        let (body, eof) = collect(&mut decoder, &mut buffer);
        assert_eq!(body, b"hello");
        assert!(!eof);
        assert!(!decoder.reading_data());
    }

    #[test]
    fn invalid_size_rejected() {
        let mut buffer = BytesMut::from(&b"xyz\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buffer).is_err());
    }

    #[test]
    fn missing_data_crlf_rejected() {
        let mut decoder = ChunkedDecoder::new();
        let mut buffer = BytesMut::from(&b"5\r\nhello"[..]);
        let (body, _) = collect(&mut decoder, &mut buffer);
        assert_eq!(body, b"hello");

        buffer.extend_from_slice(b"XX");
        assert!(decoder.decode(&mut buffer).is_err());
    }

    #[test]
    fn size_overflow_rejected() {
        let mut buffer = BytesMut::from(&b"fffffffffffffffff\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buffer).is_err());
    }
}
