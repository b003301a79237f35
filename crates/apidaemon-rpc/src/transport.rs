//! Payload codec for one-shot JSON exchanges.
//!
//! There is no length prefix and no delimiter on the wire. A connection
//! carries a single JSON document in each direction, so a frame ends when:
//!
//! - the peer shuts down its write half (EOF), or
//! - the bytes received so far already form one complete JSON value, which
//!   lets clients that send once without half-closing still be served.
//!
//! Payloads larger than the configured maximum are rejected with
//! [`CodecError::MessageTooLarge`] rather than truncated.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::IgnoredAny;
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::MAX_PAYLOAD_SIZE;

/// Codec yielding the raw bytes of a single JSON payload.
///
/// Decoding does not parse into a typed message: the server must be able to
/// answer malformed input with an error envelope, so parsing happens after
/// framing.
#[derive(Debug, Clone)]
pub struct PayloadCodec {
    max_size: usize,
    scan: Scan,
}

impl PayloadCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_size(MAX_PAYLOAD_SIZE)
    }

    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size,
            scan: Scan::default(),
        }
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn check_size(&self, len: usize) -> Result<(), CodecError> {
        if len > self.max_size {
            return Err(CodecError::MessageTooLarge {
                size: len,
                max: self.max_size,
            });
        }
        Ok(())
    }
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Incremental bracket scanner used to spot the end of the top-level object
/// or array without re-reading bytes already seen.
///
/// Only once the outermost bracket closes is the buffer parsed, and at most
/// once per frame. Anything else (a scalar, a closed value followed by more
/// bytes, or brackets that balance around invalid JSON) waits for EOF.
#[derive(Debug, Clone, Copy, Default)]
struct Scan {
    offset: usize,
    depth: usize,
    opened: bool,
    in_string: bool,
    escaped: bool,
    settled: bool,
}

impl Scan {
    /// Consume `buf[self.offset..]`; returns `true` if `buf` is one complete
    /// JSON object or array, optionally followed by whitespace.
    fn feed(&mut self, buf: &[u8]) -> bool {
        while !self.settled && self.offset < buf.len() {
            let byte = buf[self.offset];
            self.offset += 1;

            if self.in_string {
                match byte {
                    _ if self.escaped => self.escaped = false,
                    b'\\' => self.escaped = true,
                    b'"' => self.in_string = false,
                    _ => {}
                }
                continue;
            }

            match byte {
                b'{' | b'[' => {
                    self.opened = true;
                    self.depth += 1;
                }
                b'}' | b']' if self.depth > 0 => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        self.settled = true;
                        let rest_is_blank =
                            buf[self.offset..].iter().all(u8::is_ascii_whitespace);
                        return rest_is_blank
                            && serde_json::from_slice::<IgnoredAny>(buf).is_ok();
                    }
                }
                b'"' if self.opened => self.in_string = true,
                _ if byte.is_ascii_whitespace() => {}
                _ if !self.opened => self.settled = true,
                _ => {}
            }
        }
        false
    }
}

impl Decoder for PayloadCodec {
    type Item = Bytes;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.check_size(src.len())?;

        if self.scan.feed(src) {
            self.scan = Scan::default();
            return Ok(Some(src.split().freeze()));
        }

        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.check_size(src.len())?;
        self.scan = Scan::default();

        if src.is_empty() {
            return Ok(None);
        }

        Ok(Some(src.split().freeze()))
    }
}

impl<T: Serialize> Encoder<T> for PayloadCodec {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)?;
        self.check_size(json.len())?;

        dst.reserve(json.len());
        dst.put_slice(&json);

        Ok(())
    }
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Request, Response};
    use serde_json::json;

    #[test]
    fn test_decode_waits_for_incomplete_object() {
        let mut codec = PayloadCodec::new();
        let mut buf = BytesMut::from(&br#"{"method":"math.add","param"#[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(!buf.is_empty(), "partial payload must stay buffered");
    }

    #[test]
    fn test_decode_yields_complete_object_before_eof() {
        let mut codec = PayloadCodec::new();
        let payload = br#"{"method":"math.add","parameters":{"a":2,"b":3}}"#;
        let mut buf = BytesMut::from(&payload[..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], &payload[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_does_not_yield_braced_garbage_early() {
        let mut codec = PayloadCodec::new();
        let mut buf = BytesMut::from(&b"{not json}"[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_scans_each_byte_once() {
        let mut codec = PayloadCodec::new();
        let payload = br#"{"method":"system.echo","parameters":{"s":"a}\"]{","n":[1,{"x":[]}]}}"#;
        let mut buf = BytesMut::new();

        for (i, byte) in payload.iter().enumerate() {
            buf.extend_from_slice(&[*byte]);
            let frame = codec.decode(&mut buf).unwrap();
            if i + 1 < payload.len() {
                assert!(frame.is_none(), "framed early at byte {i}");
                assert_eq!(codec.scan.offset, buf.len());
            } else {
                assert_eq!(&frame.unwrap()[..], &payload[..]);
            }
        }
        assert_eq!(codec.scan.offset, 0, "scanner resets after a frame");
    }

    #[test]
    fn test_decode_allows_trailing_newline() {
        let mut codec = PayloadCodec::new();
        let mut buf = BytesMut::from(&b"{\"method\":\"system.ping\"}\n"[..]);

        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_decode_waits_for_eof_after_trailing_bytes() {
        let mut codec = PayloadCodec::new();
        let mut buf = BytesMut::from(&b"{}{}"[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"{}");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&codec.decode_eof(&mut buf).unwrap().unwrap()[..], b"{}{}{}");
    }

    #[test]
    fn test_decode_scalar_waits_for_eof() {
        let mut codec = PayloadCodec::new();
        let mut buf = BytesMut::from(&br#""{}""#[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(codec.decode_eof(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_decode_eof_yields_whatever_was_sent() {
        let mut codec = PayloadCodec::new();
        let mut buf = BytesMut::from(&b"{not json"[..]);

        let frame = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], b"{not json");
    }

    #[test]
    fn test_decode_eof_empty_buffer_is_no_frame() {
        let mut codec = PayloadCodec::new();
        let mut buf = BytesMut::new();

        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_oversized_payload() {
        let mut codec = PayloadCodec::with_max_size(16);
        let mut buf = BytesMut::from(&br#"{"method":"math.add"}"#[..]);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            CodecError::MessageTooLarge { size: 21, max: 16 }
        ));
        assert!(err.to_string().contains("payload too large"));
    }

    #[test]
    fn test_decode_accepts_payload_at_limit() {
        let payload = br#"{"a":1}"#;
        let mut codec = PayloadCodec::with_max_size(payload.len());
        let mut buf = BytesMut::from(&payload[..]);

        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_encode_response_is_plain_json() {
        let mut codec = PayloadCodec::new();
        let mut buf = BytesMut::new();

        codec.encode(Response::success(json!(5)), &mut buf).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value, json!({"error": null, "data": 5}));
    }

    #[test]
    fn test_encode_request_then_decode() {
        let mut codec = PayloadCodec::new();
        let mut buf = BytesMut::new();
        let request = Request::new("system.ping", serde_json::Map::new());

        codec.encode(&request, &mut buf).unwrap();
        let frame = codec.decode(&mut buf).unwrap().unwrap();

        let decoded: Request = serde_json::from_slice(&frame).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let mut codec = PayloadCodec::with_max_size(8);
        let mut buf = BytesMut::new();

        let err = codec
            .encode(Response::success(json!("far too long for eight bytes")), &mut buf)
            .unwrap_err();
        assert!(matches!(err, CodecError::MessageTooLarge { .. }));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_default_max_size() {
        assert_eq!(PayloadCodec::default().max_size(), 1_048_576);
    }
}
