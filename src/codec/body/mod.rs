//! Response body decoding.
//!
//! Three framing strategies exist for an HTTP/1.1 response body:
//! a declared `Content-Length`, chunked transfer encoding, and reading
//! until the peer closes the connection. [`PayloadDecoder`] dispatches
//! over them and is produced by the header decoder once the framing
//! headers are known.

mod chunked_decoder;
mod eof_decoder;
mod length_decoder;
mod payload_decoder;

pub use payload_decoder::PayloadDecoder;
