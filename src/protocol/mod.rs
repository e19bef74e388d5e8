//! Protocol Implementation
//!
//! Everything needed to turn bytes from the network into commands and replies
//! back into bytes.
//!
//! ## Modules
//!
//! - `parser`: the text command grammar (`SET key [ttl] value`, ...)
//! - `wire`: binary request/response framing for the TCP listener and client
//!
//! ## Example
//!
//! ```
//! use shardkv::protocol::{encode_request, parse_command, parse_request, CommandKind};
//! use bytes::BytesMut;
//!
//! // Framing a request on the client side
//! let mut buf = BytesMut::new();
//! encode_request(b"GETLISTELEM queue 2", &mut buf);
//!
//! // Unframing and decoding it on the server side
//! let (body, _consumed) = parse_request(&buf, 1024).unwrap().unwrap();
//! let command = parse_command(&body).unwrap();
//! assert_eq!(command.kind, CommandKind::GetListElem);
//! assert_eq!(&command.value[..], b"2");
//! ```

pub mod parser;
pub mod wire;

// Re-export commonly used types for convenience
pub use parser::{parse_command, Command, CommandKind, CommandParser, ParseError, ParseResult};
pub use wire::{
    decode_response, encode_request, encode_response, parse_request, Response, WireError,
};
