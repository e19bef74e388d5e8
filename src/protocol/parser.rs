//! Text Command Parser
//!
//! Decodes the whitespace-delimited command grammar shared by every transport:
//!
//! ```text
//! COMMAND [key] [ttl] [value...]
//! ```
//!
//! ## Design Philosophy
//!
//! 1. **Header once**: the first write parses the command name, the key and
//!    the optional TTL. Everything after that is the value and is kept
//!    verbatim, internal whitespace included.
//! 2. **Incremental**: later writes append raw bytes to the value without any
//!    further parsing, so a body can be fed in whatever chunks arrive.
//! 3. **Fail fast**: an unknown command, an oversized key or a header that
//!    ends too early is rejected on the write that sees it.
//!
//! ## The TTL Lookahead
//!
//! `SET`, `SETLIST` and `SETDICT` accept an optional TTL between the key and
//! the value. Since the value can itself start with digits, the TTL is only
//! taken when the next bytes are a run of 1 to 19 ASCII digits followed by a
//! whitespace byte:
//!
//! ```text
//! SET sssbb 800 hello     ttl = 800, value = "hello"
//! SET kk 798ds aaa        ttl = 0,   value = "798ds aaa"
//! SET bb 1                ttl = 0,   value = "1"
//! ```

use bytes::{Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Maximum length of a key in bytes.
pub const MAX_KEY_LEN: usize = 256;

/// Maximum number of digits in a TTL token. Any 19-digit number fits a u64.
pub const MAX_TTL_DIGITS: usize = 19;

/// Errors that can occur while decoding a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The command name is not one of the supported commands
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// The key exceeds [`MAX_KEY_LEN`]
    #[error("key of {0} bytes exceeds the maximum of 256 bytes")]
    KeyTooLong(usize),

    /// An explicit TTL of zero; zero is reserved for "never expires"
    #[error("ttl cannot be zero")]
    ZeroTtl,

    /// The input ended before the command header was complete
    #[error("incomplete command")]
    IncompleteInput,
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// The supported commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Keys,
    Remove,
    Get,
    GetList,
    GetDict,
    GetListElem,
    GetDictElem,
    Set,
    SetList,
    SetDict,
}

/// How much of the header a command takes after its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Nothing
    Bare,
    /// A key; any trailing bytes are ignored
    Key,
    /// A key, then the rest of the input as the value
    KeyRest,
    /// A key, an optional TTL, then a mandatory value
    KeyTtlValue,
}

impl CommandKind {
    /// Parses a command name. Names are case-sensitive.
    pub fn from_name(name: &[u8]) -> Option<Self> {
        let kind = match name {
            b"KEYS" => CommandKind::Keys,
            b"REMOVE" => CommandKind::Remove,
            b"GET" => CommandKind::Get,
            b"GETLIST" => CommandKind::GetList,
            b"GETDICT" => CommandKind::GetDict,
            b"GETLISTELEM" => CommandKind::GetListElem,
            b"GETDICTELEM" => CommandKind::GetDictElem,
            b"SET" => CommandKind::Set,
            b"SETLIST" => CommandKind::SetList,
            b"SETDICT" => CommandKind::SetDict,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Keys => "KEYS",
            CommandKind::Remove => "REMOVE",
            CommandKind::Get => "GET",
            CommandKind::GetList => "GETLIST",
            CommandKind::GetDict => "GETDICT",
            CommandKind::GetListElem => "GETLISTELEM",
            CommandKind::GetDictElem => "GETDICTELEM",
            CommandKind::Set => "SET",
            CommandKind::SetList => "SETLIST",
            CommandKind::SetDict => "SETDICT",
        }
    }

    fn shape(self) -> Shape {
        match self {
            CommandKind::Keys => Shape::Bare,
            CommandKind::Remove | CommandKind::Get | CommandKind::GetList | CommandKind::GetDict => {
                Shape::Key
            }
            CommandKind::GetListElem | CommandKind::GetDictElem => Shape::KeyRest,
            CommandKind::Set | CommandKind::SetList | CommandKind::SetDict => Shape::KeyTtlValue,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully decoded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    /// Empty for `KEYS`
    pub key: Bytes,
    /// Relative TTL in seconds, 0 when none was given
    pub ttl: u64,
    /// Raw bytes following the header
    pub value: BytesMut,
}

/// Incremental decoder for one command.
///
/// # Example
///
/// ```
/// use shardkv::protocol::{CommandKind, CommandParser};
///
/// let mut parser = CommandParser::new();
/// parser.write(b"SET greeting 60 hello").unwrap();
/// parser.write(b" world").unwrap();
///
/// let command = parser.finish().unwrap();
/// assert_eq!(command.kind, CommandKind::Set);
/// assert_eq!(command.ttl, 60);
/// assert_eq!(&command.value[..], b"hello world");
/// ```
#[derive(Debug, Default)]
pub struct CommandParser {
    /// Set once the header has been decoded
    command: Option<Command>,
}

impl CommandParser {
    /// Creates a new parser instance.
    pub fn new() -> Self {
        Self { command: None }
    }

    /// Returns true once the header has been decoded.
    pub fn header_parsed(&self) -> bool {
        self.command.is_some()
    }

    /// Feeds bytes to the parser.
    ///
    /// The first call must contain the whole header. Later calls append to
    /// the value.
    pub fn write(&mut self, data: &[u8]) -> ParseResult<()> {
        match &mut self.command {
            Some(command) => command.value.extend_from_slice(data),
            None => self.command = Some(parse_header(data)?),
        }
        Ok(())
    }

    /// Returns the decoded command.
    pub fn finish(self) -> ParseResult<Command> {
        self.command.ok_or(ParseError::IncompleteInput)
    }
}

/// Decodes a complete command in one call.
pub fn parse_command(input: &[u8]) -> ParseResult<Command> {
    let mut parser = CommandParser::new();
    parser.write(input)?;
    parser.finish()
}

// ============================================================================
// Header decoding
// ============================================================================

fn parse_header(input: &[u8]) -> ParseResult<Command> {
    let (name, rest) = next_token(input);
    if name.is_empty() {
        return Err(ParseError::IncompleteInput);
    }
    let kind = CommandKind::from_name(name)
        .ok_or_else(|| ParseError::UnknownCommand(String::from_utf8_lossy(name).into_owned()))?;

    let mut command = Command {
        kind,
        key: Bytes::new(),
        ttl: 0,
        value: BytesMut::new(),
    };

    let shape = kind.shape();
    if shape == Shape::Bare {
        return Ok(command);
    }

    let (key, rest) = next_token(rest);
    if key.is_empty() {
        return Err(ParseError::IncompleteInput);
    }
    if key.len() > MAX_KEY_LEN {
        return Err(ParseError::KeyTooLong(key.len()));
    }
    command.key = Bytes::copy_from_slice(key);

    let mut rest = skip_whitespace(rest);
    match shape {
        Shape::Key => return Ok(command),
        Shape::KeyRest => {}
        Shape::KeyTtlValue => {
            if rest.is_empty() {
                return Err(ParseError::IncompleteInput);
            }
            if let Some((ttl, consumed)) = parse_ttl(rest)? {
                command.ttl = ttl;
                rest = skip_whitespace(&rest[consumed..]);
                if rest.is_empty() {
                    return Err(ParseError::IncompleteInput);
                }
            }
        }
        Shape::Bare => unreachable!("bare commands return before the key"),
    }

    command.value.extend_from_slice(rest);
    Ok(command)
}

/// Recognizes a TTL token at the start of `input`.
///
/// A TTL ends at a single space. Digits followed by any other byte, a
/// newline included, are part of the value.
///
/// Returns the TTL and the number of bytes it spans (terminating space
/// included), or `None` if the input does not start with a TTL.
fn parse_ttl(input: &[u8]) -> ParseResult<Option<(u64, usize)>> {
    let window = &input[..input.len().min(MAX_TTL_DIGITS + 1)];
    let digits = window.iter().take_while(|b| b.is_ascii_digit()).count();

    if digits == 0 || digits == window.len() || window[digits] != b' ' {
        return Ok(None);
    }

    let ttl = window[..digits]
        .iter()
        .fold(0u64, |acc, &b| acc * 10 + u64::from(b - b'0'));
    if ttl == 0 {
        return Err(ParseError::ZeroTtl);
    }

    Ok(Some((ttl, digits + 1)))
}

/// Splits off the next whitespace-delimited token, skipping leading whitespace.
fn next_token(input: &[u8]) -> (&[u8], &[u8]) {
    let input = skip_whitespace(input);
    let end = input
        .iter()
        .position(|b| b.is_ascii_whitespace())
        .unwrap_or(input.len());
    input.split_at(end)
}

#[inline]
fn skip_whitespace(input: &[u8]) -> &[u8] {
    let start = input
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(input.len());
    &input[start..]
}
