//! # shardkv - A Sharded In-Memory Key-Value Cache
//!
//! shardkv stores three kinds of values (strings, ordered lists and
//! dictionaries) as compact binary records spread over 256 independently
//! locked shards. Keys can carry a time to live and expire lazily, the first
//! time they are read after their deadline.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               shardkv                                   │
//! │                                                                         │
//! │  ┌─────────────┐                                                        │
//! │  │ Binary TCP  │──┐                                                     │
//! │  │ (+ TLS)     │  │   ┌─────────────┐    ┌─────────────┐                │
//! │  ├─────────────┤  │   │  Command    │    │  Command    │                │
//! │  │ Text (ncat) │──┼──>│  Decoder    │───>│  Handler    │                │
//! │  ├─────────────┤  │   └─────────────┘    └──────┬──────┘                │
//! │  │ HTTP (+TLS) │──┘                             │                       │
//! │  └─────────────┘                                ▼                       │
//! │                     ┌──────────────────────────────────────────────┐    │
//! │                     │                CacheEngine                   │    │
//! │                     │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │    │
//! │                     │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │ ...255 │ │    │
//! │                     │  │RwLock  │ │RwLock  │ │RwLock  │ │        │ │    │
//! │                     │  └────────┘ └────────┘ └────────┘ └────────┘ │    │
//! │                     └──────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use shardkv::commands::CommandHandler;
//! use shardkv::config::ConnectionLimits;
//! use shardkv::connection::{serve, ConnectionStats};
//! use shardkv::storage::CacheEngine;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let engine = Arc::new(CacheEngine::new());
//!     let stats = Arc::new(ConnectionStats::new());
//!     let listener = TcpListener::bind("127.0.0.1:4502").await?;
//!
//!     serve(
//!         listener,
//!         CommandHandler::new(engine),
//!         stats,
//!         ConnectionLimits::default(),
//!         None,
//!     )
//!     .await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `SET key [ttl] value`
//! - `SETLIST key [ttl] element...`
//! - `SETDICT key [ttl] name:value...`
//! - `GET key` / `GETLIST key` / `GETDICT key`
//! - `GETLISTELEM key position`
//! - `GETDICTELEM key name`
//! - `REMOVE key`
//! - `KEYS`
//!
//! The TTL is a number of seconds. Omitting it means the key never expires.
//!
//! ## Module Overview
//!
//! - [`storage`]: record codec, shard table and the typed cache engine
//! - [`protocol`]: text command decoder and binary wire framing
//! - [`commands`]: dispatch of decoded commands onto the engine
//! - [`connection`]: binary TCP and plain-text listeners
//! - [`http`]: `POST /` JSON interface
//! - [`tls`]: mutual TLS configuration
//! - [`client`]: pooled async client for the binary protocol
//! - [`config`]: listener and connection settings

pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod http;
pub mod protocol;
pub mod storage;
pub mod tls;

// Re-export commonly used types for convenience
pub use client::{Client, ClientError};
pub use commands::{CommandHandler, Reply};
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{parse_command, Command, CommandKind, ParseError};
pub use storage::{CacheEngine, KeyType, StorageError};

/// Version of shardkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
