//! Storage Engine Module
//!
//! The core of shardkv: a sharded table of encoded records and a typed engine
//! on top of it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      CacheEngine                            │
//! │     typed get/set, type tags, lazy expiry, dict lookup      │
//! └──────────────────────────────┬──────────────────────────────┘
//!                                │ encoded records
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ShardTable                             │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐       ┌───────────┐   │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │  ...  │ Shard 255 │   │
//! │  └─────────┘ └─────────┘ └─────────┘       └───────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! - `codec`: record header and list/dictionary payload layout
//! - `shard`: FNV-1a partitioning and per-partition locking
//! - `engine`: the typed API
//!
//! ## Example
//!
//! ```
//! use shardkv::storage::CacheEngine;
//! use bytes::Bytes;
//!
//! let engine = CacheEngine::new();
//!
//! engine.set_list(Bytes::from("queue"), 3600, &["a", "b", "c"]).unwrap();
//! assert_eq!(engine.get_list_element(b"queue", 1).unwrap(), Bytes::from("b"));
//! ```

pub mod codec;
pub mod engine;
pub mod shard;

// Re-export commonly used types
pub use codec::{KeyType, StorageError, StorageResult};
pub use engine::{CacheEngine, StorageStats};
pub use shard::{shard_of, ShardTable, NUM_SHARDS};
