//! Binary Wire Protocol
//!
//! Framing used by the binary TCP listener and the client. All integers are
//! little-endian.
//!
//! ## Requests
//!
//! ```text
//! ┌──────────┬──────────────┬────────────────────────┐
//! │ 0x11 (1) │ length (u32) │ command text (length)  │
//! └──────────┴──────────────┴────────────────────────┘
//! ```
//!
//! ## Responses
//!
//! The first byte is a status: `0x22` ok, `0x44` not found, `0x99` error.
//!
//! - ok: a data-type byte follows.
//!   - `0x50` none
//!   - `0x51` string: `u32 len` ++ bytes
//!   - `0x52` list: `u32 count` ++ count × (`u32 len` ++ bytes)
//!   - `0x53` dict: `u32 count` ++ count × (`u32 klen` ++ key ++ `u32 vlen` ++ value)
//! - not found: nothing follows.
//! - error: `u32 len` ++ UTF-8 message.
//!
//! Both decoders follow the same contract as the rest of the protocol module:
//! `Ok(Some((value, consumed)))` when a full frame is buffered, `Ok(None)` when
//! more bytes are needed, `Err` on a framing violation.

use crate::commands::{CommandError, Reply};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// First byte of every request.
pub const REQUEST_MARKER: u8 = 0x11;

/// Marker byte plus the u32 length.
pub const REQUEST_HEADER_LEN: usize = 5;

/// Default upper bound on a request body (16 MiB).
pub const DEFAULT_MAX_REQUEST: usize = 16 * 1024 * 1024;

/// Response status bytes
pub mod status {
    pub const OK: u8 = 0x22;
    pub const NOT_FOUND: u8 = 0x44;
    pub const ERROR: u8 = 0x99;
}

/// Data-type bytes following an OK status
pub mod data_type {
    pub const NONE: u8 = 0x50;
    pub const STRING: u8 = 0x51;
    pub const LIST: u8 = 0x52;
    pub const DICT: u8 = 0x53;
}

/// Framing errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The request did not start with [`REQUEST_MARKER`]
    #[error("invalid request marker: {0:#04x}")]
    InvalidMarker(u8),

    /// The request announced a body larger than allowed
    #[error("request too large: {size} bytes (max: {max})")]
    RequestTooLarge { size: usize, max: usize },

    #[error("unknown response status: {0:#04x}")]
    UnknownStatus(u8),

    #[error("unknown response data type: {0:#04x}")]
    UnknownDataType(u8),
}

/// Result type for framing operations.
pub type WireResult<T> = Result<T, WireError>;

/// A decoded response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(Reply),
    NotFound,
    Error(String),
}

impl From<Result<Reply, CommandError>> for Response {
    fn from(result: Result<Reply, CommandError>) -> Self {
        match result {
            Ok(reply) => Response::Ok(reply),
            Err(err) if err.is_not_found() => Response::NotFound,
            Err(err) => Response::Error(err.to_string()),
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Appends a framed request to `dst`.
pub fn encode_request(command: &[u8], dst: &mut BytesMut) {
    dst.reserve(REQUEST_HEADER_LEN + command.len());
    dst.put_u8(REQUEST_MARKER);
    dst.put_u32_le(command.len() as u32);
    dst.put_slice(command);
}

/// Reads a request header, returning the body length.
///
/// The marker is checked as soon as one byte is available, so garbage is
/// rejected without waiting for a full header.
pub fn parse_request_header(buf: &[u8], max_request: usize) -> WireResult<Option<usize>> {
    match buf.first() {
        None => return Ok(None),
        Some(&REQUEST_MARKER) => {}
        Some(&other) => return Err(WireError::InvalidMarker(other)),
    }

    if buf.len() < REQUEST_HEADER_LEN {
        return Ok(None);
    }

    let size = (&buf[1..REQUEST_HEADER_LEN]).get_u32_le() as usize;
    if size > max_request {
        return Err(WireError::RequestTooLarge {
            size,
            max: max_request,
        });
    }

    Ok(Some(size))
}

/// Parses a complete request, returning the command text and the bytes used.
pub fn parse_request(buf: &[u8], max_request: usize) -> WireResult<Option<(Bytes, usize)>> {
    let Some(size) = parse_request_header(buf, max_request)? else {
        return Ok(None);
    };

    let total = REQUEST_HEADER_LEN + size;
    if buf.len() < total {
        return Ok(None);
    }

    Ok(Some((
        Bytes::copy_from_slice(&buf[REQUEST_HEADER_LEN..total]),
        total,
    )))
}

// ============================================================================
// Responses
// ============================================================================

/// Appends an encoded response to `dst`.
pub fn encode_response(response: &Response, dst: &mut BytesMut) {
    match response {
        Response::Ok(reply) => {
            dst.put_u8(status::OK);
            encode_reply(reply, dst);
        }
        Response::NotFound => dst.put_u8(status::NOT_FOUND),
        Response::Error(message) => {
            dst.put_u8(status::ERROR);
            put_chunk(dst, message.as_bytes());
        }
    }
}

fn encode_reply(reply: &Reply, dst: &mut BytesMut) {
    match reply {
        Reply::None => dst.put_u8(data_type::NONE),
        Reply::String(value) => {
            dst.put_u8(data_type::STRING);
            put_chunk(dst, value);
        }
        Reply::List(elements) => {
            dst.put_u8(data_type::LIST);
            dst.put_u32_le(elements.len() as u32);
            for element in elements {
                put_chunk(dst, element);
            }
        }
        Reply::Dict(entries) => {
            dst.put_u8(data_type::DICT);
            dst.put_u32_le(entries.len() as u32);
            for (key, value) in entries {
                put_chunk(dst, key);
                put_chunk(dst, value);
            }
        }
    }
}

#[inline]
fn put_chunk(dst: &mut BytesMut, data: &[u8]) {
    dst.put_u32_le(data.len() as u32);
    dst.put_slice(data);
}

/// Attempts to decode one response frame.
pub fn decode_response(buf: &[u8]) -> WireResult<Option<(Response, usize)>> {
    let mut reader = Reader { buf, pos: 0 };

    let Some(tag) = reader.u8() else {
        return Ok(None);
    };

    let response = match tag {
        status::NOT_FOUND => Some(Response::NotFound),
        status::ERROR => reader
            .chunk()
            .map(|msg| Response::Error(String::from_utf8_lossy(&msg).into_owned())),
        status::OK => decode_reply(&mut reader)?.map(Response::Ok),
        other => return Err(WireError::UnknownStatus(other)),
    };

    Ok(response.map(|response| (response, reader.pos)))
}

fn decode_reply(reader: &mut Reader<'_>) -> WireResult<Option<Reply>> {
    let Some(tag) = reader.u8() else {
        return Ok(None);
    };

    let reply = match tag {
        data_type::NONE => Some(Reply::None),
        data_type::STRING => reader.chunk().map(Reply::String),
        data_type::LIST => reader.list().map(Reply::List),
        data_type::DICT => reader.dict().map(Reply::Dict),
        other => return Err(WireError::UnknownDataType(other)),
    };

    Ok(reply)
}

/// Bounds-checked cursor; every read returns `None` on a short buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn remaining(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    fn u8(&mut self) -> Option<u8> {
        let byte = *self.remaining().first()?;
        self.pos += 1;
        Some(byte)
    }

    fn u32(&mut self) -> Option<usize> {
        let value = self.remaining().get(..4).map(|mut bytes| bytes.get_u32_le())?;
        self.pos += 4;
        Some(value as usize)
    }

    fn chunk(&mut self) -> Option<Bytes> {
        let len = self.u32()?;
        let data = Bytes::copy_from_slice(self.remaining().get(..len)?);
        self.pos += len;
        Some(data)
    }

    fn list(&mut self) -> Option<Vec<Bytes>> {
        let count = self.u32()?;
        // each element needs at least its length prefix
        let mut elements = Vec::with_capacity(count.min(self.remaining().len() / 4));
        for _ in 0..count {
            elements.push(self.chunk()?);
        }
        Some(elements)
    }

    fn dict(&mut self) -> Option<Vec<(Bytes, Bytes)>> {
        let count = self.u32()?;
        let mut entries = Vec::with_capacity(count.min(self.remaining().len() / 8));
        for _ in 0..count {
            let key = self.chunk()?;
            let value = self.chunk()?;
            entries.push((key, value));
        }
        Some(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode(response: &Response) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_response(response, &mut buf);
        buf
    }

    #[test]
    fn test_encode_request() {
        let mut buf = BytesMut::new();
        encode_request(b"GET key", &mut buf);
        assert_eq!(&buf[..], b"\x11\x07\x00\x00\x00GET key");
    }

    #[test]
    fn test_parse_request() {
        let mut buf = BytesMut::new();
        encode_request(b"GET a", &mut buf);
        encode_request(b"KEYS", &mut buf);

        let (command, consumed) = parse_request(&buf, DEFAULT_MAX_REQUEST).unwrap().unwrap();
        assert_eq!(command, Bytes::from("GET a"));
        assert_eq!(consumed, 10);

        let (command, _) = parse_request(&buf[consumed..], DEFAULT_MAX_REQUEST)
            .unwrap()
            .unwrap();
        assert_eq!(command, Bytes::from("KEYS"));
    }

    #[test]
    fn test_parse_request_incomplete() {
        assert_eq!(parse_request(b"", 64), Ok(None));
        assert_eq!(parse_request(b"\x11\x05\x00", 64), Ok(None));
        assert_eq!(parse_request(b"\x11\x05\x00\x00\x00GET", 64), Ok(None));
    }

    #[test]
    fn test_invalid_marker() {
        assert_eq!(parse_request(b"G", 64), Err(WireError::InvalidMarker(b'G')));
        assert_eq!(
            parse_request_header(b"\x12\x00\x00\x00\x00", 64),
            Err(WireError::InvalidMarker(0x12))
        );
    }

    #[test]
    fn test_request_too_large() {
        assert_eq!(
            parse_request_header(b"\x11\x41\x00\x00\x00", 64),
            Err(WireError::RequestTooLarge { size: 65, max: 64 })
        );
        assert_eq!(parse_request_header(b"\x11\x40\x00\x00\x00", 64), Ok(Some(64)));
    }

    #[test]
    fn test_response_layouts() {
        assert_eq!(&encode(&Response::NotFound)[..], &[0x44]);
        assert_eq!(&encode(&Response::Ok(Reply::None))[..], &[0x22, 0x50]);
        assert_eq!(
            &encode(&Response::Ok(Reply::String(Bytes::from("hi"))))[..],
            &[0x22, 0x51, 2, 0, 0, 0, b'h', b'i']
        );
        assert_eq!(
            &encode(&Response::Error("bad".to_string()))[..],
            &[0x99, 3, 0, 0, 0, b'b', b'a', b'd']
        );
        assert_eq!(
            &encode(&Response::Ok(Reply::Dict(vec![(
                Bytes::from("k"),
                Bytes::from("v")
            )])))[..],
            &[0x22, 0x53, 1, 0, 0, 0, 1, 0, 0, 0, b'k', 1, 0, 0, 0, b'v']
        );
    }

    #[test]
    fn test_decode_partial_response() {
        let full = encode(&Response::Ok(Reply::List(vec![
            Bytes::from("one"),
            Bytes::from("two"),
        ])));

        for split in 0..full.len() {
            assert_eq!(decode_response(&full[..split]), Ok(None), "split at {}", split);
        }

        let (response, consumed) = decode_response(&full).unwrap().unwrap();
        assert_eq!(consumed, full.len());
        assert_eq!(
            response,
            Response::Ok(Reply::List(vec![Bytes::from("one"), Bytes::from("two")]))
        );
    }

    #[test]
    fn test_decode_unknown_bytes() {
        assert_eq!(decode_response(&[0x01]), Err(WireError::UnknownStatus(0x01)));
        assert_eq!(
            decode_response(&[0x22, 0x60]),
            Err(WireError::UnknownDataType(0x60))
        );
    }

    #[test]
    fn test_response_from_result() {
        use crate::storage::StorageError;

        assert_eq!(
            Response::from(Err(CommandError::Storage(StorageError::NotFound))),
            Response::NotFound
        );
        assert_eq!(
            Response::from(Err(CommandError::InvalidPosition("x".to_string()))),
            Response::Error("invalid list position 'x'".to_string())
        );
        assert_eq!(Response::from(Ok(Reply::None)), Response::Ok(Reply::None));
    }

    fn reply_strategy() -> impl Strategy<Value = Reply> {
        let chunk = || prop::collection::vec(any::<u8>(), 0..16).prop_map(Bytes::from);
        prop_oneof![
            Just(Reply::None),
            chunk().prop_map(Reply::String),
            prop::collection::vec(chunk(), 0..8).prop_map(Reply::List),
            prop::collection::vec((chunk(), chunk()), 0..8).prop_map(Reply::Dict),
        ]
    }

    proptest! {
        #[test]
        fn prop_response_roundtrip(reply in reply_strategy(), trailing in prop::collection::vec(any::<u8>(), 0..4)) {
            let response = Response::Ok(reply);
            let mut buf = encode(&response);
            let len = buf.len();
            buf.extend_from_slice(&trailing);

            let (decoded, consumed) = decode_response(&buf).unwrap().unwrap();
            prop_assert_eq!(consumed, len);
            prop_assert_eq!(decoded, response);
        }
    }
}
