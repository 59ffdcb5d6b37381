//! Decoder for bodies delimited by connection close.
//!
//! When a response declares neither `Content-Length` nor a chunked transfer
//! coding, every byte until EOF belongs to the body. The decoder itself
//! cannot observe EOF; the connection stops reading when the stream reports
//! it and treats the body as complete.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::protocol::{ParseError, PayloadItem};

/// Passes buffered bytes through as body data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EofDecoder;

impl Decoder for EofDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        Ok(Some(PayloadItem::Chunk(src.split().freeze())))
    }
}
