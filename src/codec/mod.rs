//! Incremental decoding of HTTP/1.1 responses.
//!
//! The wire response is consumed in three phases, each with its own
//! [`Decoder`](tokio_util::codec::Decoder): the status line
//! ([`StatusDecoder`]), the header block ([`HeaderDecoder`], which also
//! picks the body framing strategy), and the body
//! ([`body::PayloadDecoder`]). Every `decode` call yields at most one
//! semantic event, so the connection driving the decoders regains control
//! between events and can update its state and buffers.

pub mod body;

mod header_decoder;
mod status_decoder;

pub use header_decoder::HeaderDecoder;
pub use status_decoder::{StatusDecoder, StatusLine};
