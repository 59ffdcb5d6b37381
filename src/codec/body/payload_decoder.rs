//! Unified decoder over the response body framing strategies.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::chunked_decoder::ChunkedDecoder;
use crate::codec::body::eof_decoder::EofDecoder;
use crate::codec::body::length_decoder::LengthDecoder;
use crate::protocol::{ParseError, PayloadItem};

/// Decodes a response body using the strategy chosen from the headers:
/// a fixed `Content-Length`, chunked transfer encoding, everything until
/// connection close, or no body at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDecoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Length(LengthDecoder),
    Chunked(ChunkedDecoder),
    UntilEof(EofDecoder),
    NoBody,
}

impl PayloadDecoder {
    /// Creates a decoder for messages without a body.
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    /// Creates a decoder for a fixed-length body.
    pub fn length(size: u64) -> Self {
        Self { kind: Kind::Length(LengthDecoder::new(size)) }
    }

    /// Creates a decoder for chunked transfer encoding.
    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(ChunkedDecoder::new()) }
    }

    /// Creates a decoder for a body delimited by connection close.
    pub fn until_eof() -> Self {
        Self { kind: Kind::UntilEof(EofDecoder) }
    }

    /// Returns true for the no-body strategy.
    pub fn is_empty(&self) -> bool {
        matches!(self.kind, Kind::NoBody)
    }

    /// Returns true for the fixed-length strategy.
    pub fn is_length(&self) -> bool {
        matches!(self.kind, Kind::Length(_))
    }

    /// Returns true for the chunked strategy.
    pub fn is_chunked(&self) -> bool {
        matches!(self.kind, Kind::Chunked(_))
    }

    /// Returns true for the read-until-close strategy.
    pub fn is_until_eof(&self) -> bool {
        matches!(self.kind, Kind::UntilEof(_))
    }

    /// Body bytes the decoder still expects, when that is knowable: the
    /// outstanding length for fixed-length bodies, the unread part of the
    /// current chunk for chunked bodies, zero otherwise.
    pub(crate) fn remaining(&self) -> u64 {
        match &self.kind {
            Kind::Length(decoder) => decoder.remaining(),
            Kind::Chunked(decoder) => decoder.remaining(),
            Kind::UntilEof(_) | Kind::NoBody => 0,
        }
    }

    /// True when a chunked body is mid-chunk, where EOF means truncation.
    pub(crate) fn reading_chunk_data(&self) -> bool {
        match &self.kind {
            Kind::Chunked(decoder) => decoder.reading_data(),
            _ => false,
        }
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match &mut self.kind {
            Kind::Length(decoder) => decoder.decode(src),
            Kind::Chunked(decoder) => decoder.decode(src),
            Kind::UntilEof(decoder) => decoder.decode(src),
            Kind::NoBody => Ok(Some(PayloadItem::Eof)),
        }
    }
}
