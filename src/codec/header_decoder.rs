//! Decoder for the response header block, including the body framing
//! decision derived from the parsed headers.

use bytes::{Buf, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use httparse::Status;
use tokio_util::codec::Decoder;

use crate::codec::body::PayloadDecoder;
use crate::ensure;
use crate::protocol::ParseError;

const MAX_HEADER_NUM: usize = 64;
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Decodes everything between the status line and the body.
///
/// Yields the header map together with the [`PayloadDecoder`] chosen per
/// RFC 7230 framing rules: `Content-Length` wins, then
/// `Transfer-Encoding: chunked`, and a response with neither is delimited
/// by connection close. Responses that cannot carry a body (HEAD, 1xx,
/// 204, 304, or a zero Content-Length) get the empty decoder.
pub struct HeaderDecoder {
    method: Method,
    status: StatusCode,
}

impl HeaderDecoder {
    /// Creates a decoder for the response to `method` with status `status`.
    pub fn new(method: Method, status: StatusCode) -> Self {
        Self { method, status }
    }
}

impl Decoder for HeaderDecoder {
    type Item = (HeaderMap, PayloadDecoder);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut parsed = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];

        match httparse::parse_headers(&src[..], &mut parsed) {
            Ok(Status::Complete((consumed, raw_headers))) => {
                ensure!(
                    consumed <= MAX_HEADER_BYTES,
                    ParseError::too_large_header(consumed, MAX_HEADER_BYTES)
                );

                let mut headers = HeaderMap::with_capacity(raw_headers.len());
                for header in raw_headers {
                    let name = HeaderName::from_bytes(header.name.as_bytes())
                        .map_err(|e| ParseError::invalid_header(e.to_string()))?;
                    let value = HeaderValue::from_bytes(header.value)
                        .map_err(|e| ParseError::invalid_header(e.to_string()))?;
                    headers.append(name, value);
                }

                let payload = parse_payload(&self.method, self.status, &headers)?;
                src.advance(consumed);
                Ok(Some((headers, payload)))
            }
            Ok(Status::Partial) => {
                ensure!(
                    src.len() <= MAX_HEADER_BYTES,
                    ParseError::too_large_header(src.len(), MAX_HEADER_BYTES)
                );
                Ok(None)
            }
            Err(e) => Err(ParseError::invalid_header(e.to_string())),
        }
    }
}

fn parse_payload(
    method: &Method,
    status: StatusCode,
    headers: &HeaderMap,
) -> Result<PayloadDecoder, ParseError> {
    if !response_has_body(method, status) {
        return Ok(PayloadDecoder::empty());
    }

    // refer: https://www.rfc-editor.org/rfc/rfc7230#section-3.3
    if let Some(value) = headers.get(http::header::CONTENT_LENGTH) {
        let text =
            value.to_str().map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;
        let length = text
            .trim()
            .parse::<u64>()
            .map_err(|_| ParseError::invalid_content_length(format!("value {text} is not u64")))?;

        return Ok(if length == 0 { PayloadDecoder::empty() } else { PayloadDecoder::length(length) });
    }

    if is_chunked(headers.get(http::header::TRANSFER_ENCODING)) {
        return Ok(PayloadDecoder::chunked());
    }

    Ok(PayloadDecoder::until_eof())
}

fn response_has_body(method: &Method, status: StatusCode) -> bool {
    if *method == Method::HEAD {
        return false;
    }
    if status.is_informational() {
        return false;
    }
    status != StatusCode::NO_CONTENT && status != StatusCode::NOT_MODIFIED
}

fn is_chunked(header_value: Option<&HeaderValue>) -> bool {
    header_value
        .and_then(|value| value.to_str().ok())
        .and_then(|encodings| encodings.rsplit(',').next())
        .map(|last_encoding| last_encoding.trim() == "chunked")
        .unwrap_or(false)
}
