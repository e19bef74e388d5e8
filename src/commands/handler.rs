//! Command Handler Module
//!
//! Executes decoded commands against the cache engine and normalizes every
//! result into a [`Reply`] that the transports know how to serialize.
//!
//! ## Supported Commands
//!
//! - `SET key [ttl] value` - Store a string
//! - `SETLIST key [ttl] a b c` - Store a list of whitespace-separated elements
//! - `SETDICT key [ttl] k1:v1 k2:v2` - Store a dictionary
//! - `GET key` - Read a string
//! - `GETLIST key` - Read a whole list
//! - `GETDICT key` - Read a whole dictionary, in key order
//! - `GETLISTELEM key position` - Read one list element (0-indexed)
//! - `GETDICTELEM key subkey` - Look up one dictionary entry
//! - `REMOVE key` - Delete a key
//! - `KEYS` - List every stored key
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  handle()   │───>│  execute()  │───>│ dispatch()  │     │
//! │  │  (decode)   │    │             │    │             │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                         CacheEngine         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::protocol::{parse_command, Command, CommandKind, ParseError};
use crate::storage::codec::split_dict_element;
use crate::storage::{CacheEngine, StorageError};
use bytes::Bytes;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Errors produced while handling a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The command text could not be decoded
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The engine rejected the operation
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// `GETLISTELEM` position is not an unsigned integer
    #[error("invalid list position '{0}'")]
    InvalidPosition(String),
}

impl CommandError {
    /// Returns true if this error means "no such key or element".
    pub fn is_not_found(&self) -> bool {
        matches!(self, CommandError::Storage(StorageError::NotFound))
    }
}

/// Result type for command execution.
pub type CommandResult = Result<Reply, CommandError>;

/// The normalized result of a command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Reply {
    /// Writes and removals carry no data
    #[default]
    None,
    String(Bytes),
    List(Vec<Bytes>),
    /// Dictionary entries in key order
    Dict(Vec<(Bytes, Bytes)>),
}

impl Reply {
    pub fn is_none(&self) -> bool {
        matches!(self, Reply::None)
    }
}

/// Serializes as JSON-friendly values: strings are decoded lossily as UTF-8,
/// dictionaries become maps.
impl Serialize for Reply {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Reply::None => serializer.serialize_unit(),
            Reply::String(value) => serializer.serialize_str(&String::from_utf8_lossy(value)),
            Reply::List(elements) => {
                let mut seq = serializer.serialize_seq(Some(elements.len()))?;
                for element in elements {
                    seq.serialize_element(&String::from_utf8_lossy(element))?;
                }
                seq.end()
            }
            Reply::Dict(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(
                        &String::from_utf8_lossy(key),
                        &String::from_utf8_lossy(value),
                    )?;
                }
                map.end()
            }
        }
    }
}

/// Handles commands by dispatching them to the cache engine.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    /// The cache engine
    engine: Arc<CacheEngine>,
}

impl CommandHandler {
    /// Creates a new command handler with the given engine.
    pub fn new(engine: Arc<CacheEngine>) -> Self {
        Self { engine }
    }

    /// Returns the engine this handler executes against.
    pub fn engine(&self) -> &Arc<CacheEngine> {
        &self.engine
    }

    /// Decodes and executes a complete command text.
    pub fn handle(&self, request: &[u8]) -> CommandResult {
        let command = parse_command(request)?;
        self.execute(command)
    }

    /// Executes a decoded command.
    pub fn execute(&self, command: Command) -> CommandResult {
        trace!(
            command = %command.kind,
            key = %String::from_utf8_lossy(&command.key),
            ttl = command.ttl,
            "Executing command"
        );
        self.dispatch(command)
    }

    /// Dispatches a command to its engine call.
    fn dispatch(&self, command: Command) -> CommandResult {
        let Command {
            kind,
            key,
            ttl,
            value,
        } = command;
        let value = value.trim_ascii();

        match kind {
            CommandKind::Keys => Ok(Reply::List(self.engine.keys())),
            CommandKind::Remove => {
                self.engine.remove(&key);
                Ok(Reply::None)
            }
            CommandKind::Get => Ok(Reply::String(self.engine.get(&key)?)),
            CommandKind::GetList => Ok(Reply::List(self.engine.get_list(&key)?)),
            CommandKind::GetDict => self.cmd_getdict(&key),
            CommandKind::GetListElem => {
                let position = parse_position(value)?;
                Ok(Reply::String(self.engine.get_list_element(&key, position)?))
            }
            CommandKind::GetDictElem => {
                Ok(Reply::String(self.engine.get_dict_element(&key, value)?))
            }
            CommandKind::Set => {
                self.engine.set(key, ttl, value);
                Ok(Reply::None)
            }
            CommandKind::SetList => {
                self.engine.set_list(key, ttl, &split_elements(value))?;
                Ok(Reply::None)
            }
            CommandKind::SetDict => {
                self.engine.set_dict(key, ttl, &split_elements(value))?;
                Ok(Reply::None)
            }
        }
    }

    /// A repeated subkey keeps only its first value, the one
    /// `GETDICTELEM` finds.
    fn cmd_getdict(&self, key: &[u8]) -> CommandResult {
        let mut entries = self
            .engine
            .get_dict(key)?
            .iter()
            .map(|element| -> Result<(Bytes, Bytes), StorageError> {
                let (key, value) = split_dict_element(element)?;
                Ok((element.slice_ref(key), element.slice_ref(value)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // sorted by subkey, so repeats are adjacent
        entries.dedup_by(|later, earlier| later.0 == earlier.0);

        Ok(Reply::Dict(entries))
    }
}

/// Splits a list or dictionary value on ASCII whitespace.
fn split_elements(value: &[u8]) -> Vec<&[u8]> {
    value
        .split(|b| b.is_ascii_whitespace())
        .filter(|element| !element.is_empty())
        .collect()
}

fn parse_position(value: &[u8]) -> Result<usize, CommandError> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| CommandError::InvalidPosition(String::from_utf8_lossy(value).into_owned()))
}
