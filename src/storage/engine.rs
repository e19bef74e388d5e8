//! Typed Cache Engine
//!
//! This module implements the core cache engine for shardkv. It layers the
//! three value shapes (string, list, dictionary) on top of the
//! [`ShardTable`], storing every value as one encoded record.
//!
//! ## Design Decisions
//!
//! 1. **Records, not objects**: each key maps to a single byte blob
//!    (header + payload), so a read is one lookup and one refcount bump.
//! 2. **Type tags**: the header carries the value shape; asking for a list
//!    under a string key fails with `WrongType` instead of misreading bytes.
//! 3. **Lazy expiry only**: an expired record is removed by the first read
//!    that notices it. There is no background sweep.
//! 4. **Last writer wins**: every `set*` overwrites unconditionally.
//!
//! ## Expiry and Concurrent Writers
//!
//! A read observes expiry under the partition's read lock, then removes the
//! key under the write lock, re-checking expiry before it deletes. A writer
//! that replaced the record in between keeps its value.

use crate::storage::codec::{self, KeyType, StorageError, StorageResult};
use crate::storage::shard::ShardTable;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Current time in whole seconds since the Unix epoch.
#[inline]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Converts a relative TTL in seconds into an absolute expiry.
///
/// `0` stays `0` (never expires).
#[inline]
pub fn absolute_ttl(ttl_secs: u64, now: u64) -> u64 {
    if ttl_secs == 0 {
        0
    } else {
        now.saturating_add(ttl_secs)
    }
}

/// The main storage engine for shardkv.
///
/// Designed to be wrapped in an `Arc` and shared across all connection
/// tasks. All operations are thread-safe and only ever lock the partition
/// that owns the key.
///
/// # Example
///
/// ```
/// use shardkv::storage::CacheEngine;
/// use bytes::Bytes;
///
/// let engine = CacheEngine::new();
///
/// engine.set(Bytes::from("name"), 0, b"Ariz");
/// assert_eq!(engine.get(b"name").unwrap(), Bytes::from("Ariz"));
///
/// engine.set_dict(Bytes::from("user"), 60, &["name:Ariz", "lang:rust"]).unwrap();
/// assert_eq!(engine.get_dict_element(b"user", b"lang").unwrap(), Bytes::from("rust"));
/// ```
pub struct CacheEngine {
    table: ShardTable,

    /// Statistics: total read operations
    get_count: AtomicU64,

    /// Statistics: total write operations
    set_count: AtomicU64,

    /// Statistics: total REMOVE operations
    del_count: AtomicU64,

    /// Statistics: number of keys removed by lazy expiry
    expired_count: AtomicU64,
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("table", &self.table)
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for CacheEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self {
            table: ShardTable::new(),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // RECORD OPERATIONS
    // ========================================================================

    /// Reads the payload stored under `key`, which must hold `expected`.
    ///
    /// Fails with `NotFound` if the key is absent or expired, and with
    /// `WrongType` if it holds a different shape. An expired key is deleted.
    pub fn get_record(&self, key: &[u8], expected: KeyType) -> StorageResult<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let record = self.table.get_raw(key).ok_or(StorageError::NotFound)?;
        let (header, payload) = codec::decode_record(&record)?;

        if header.key_type != expected {
            return Err(StorageError::WrongType {
                expected,
                found: header.key_type,
            });
        }

        let now = unix_now();
        if header.is_expired(now) {
            self.evict_expired(key, now);
            return Err(StorageError::NotFound);
        }

        Ok(payload)
    }

    /// Stores `payload` under `key` as a record of `key_type`.
    ///
    /// `ttl_secs` is relative to now; `0` means the key never expires.
    pub fn put_record(&self, key: Bytes, key_type: KeyType, ttl_secs: u64, payload: &[u8]) {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let ttl = absolute_ttl(ttl_secs, unix_now());
        let record = codec::encode_record(key_type, ttl, payload);
        self.table.put_raw(key, record);
    }

    /// Removes `key` if its current record is still expired at `now`.
    fn evict_expired(&self, key: &[u8], now: u64) {
        let removed = self.table.delete_if(key, |record| {
            codec::decode_header(record)
                .map(|header| header.is_expired(now))
                .unwrap_or(false)
        });

        if removed {
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            trace!(key = %String::from_utf8_lossy(key), "Lazily expired key");
        }
    }

    // ========================================================================
    // STRING OPERATIONS
    // ========================================================================

    /// Gets a string value.
    pub fn get(&self, key: &[u8]) -> StorageResult<Bytes> {
        self.get_record(key, KeyType::String)
    }

    /// Sets a string value, overwriting whatever the key held before.
    pub fn set(&self, key: Bytes, ttl_secs: u64, value: &[u8]) {
        self.put_record(key, KeyType::String, ttl_secs, value);
    }

    // ========================================================================
    // LIST OPERATIONS
    // ========================================================================

    /// Stores an ordered list of elements.
    pub fn set_list<T: AsRef<[u8]>>(
        &self,
        key: Bytes,
        ttl_secs: u64,
        elements: &[T],
    ) -> StorageResult<()> {
        let payload = codec::encode_list(elements)?;
        self.put_record(key, KeyType::List, ttl_secs, &payload);
        Ok(())
    }

    /// Returns every element of a list, in order.
    pub fn get_list(&self, key: &[u8]) -> StorageResult<Vec<Bytes>> {
        let payload = self.get_record(key, KeyType::List)?;
        codec::decode_list(&payload)
    }

    /// Returns the list element at `position` (0-indexed).
    pub fn get_list_element(&self, key: &[u8], position: usize) -> StorageResult<Bytes> {
        let payload = self.get_record(key, KeyType::List)?;
        let (offset, len) = codec::find_element(&payload, position)?;
        Ok(payload.slice(offset..offset + len))
    }

    // ========================================================================
    // DICTIONARY OPERATIONS
    // ========================================================================

    /// Stores a dictionary built from `key:value` elements.
    ///
    /// Fails with `MalformedElement` if any element lacks a `:`.
    pub fn set_dict<T: AsRef<[u8]>>(
        &self,
        key: Bytes,
        ttl_secs: u64,
        elements: &[T],
    ) -> StorageResult<()> {
        let payload = codec::encode_dict(elements)?;
        self.put_record(key, KeyType::Dict, ttl_secs, &payload);
        Ok(())
    }

    /// Returns the raw dictionary elements in key order.
    ///
    /// Each element still carries its 2-byte separator offset; use
    /// [`codec::split_dict_element`] to split it.
    pub fn get_dict(&self, key: &[u8]) -> StorageResult<Vec<Bytes>> {
        let payload = self.get_record(key, KeyType::Dict)?;
        codec::decode_list(&payload)
    }

    /// Looks up a single dictionary entry by its key.
    pub fn get_dict_element(&self, key: &[u8], lookup: &[u8]) -> StorageResult<Bytes> {
        let payload = self.get_record(key, KeyType::Dict)?;
        let range = codec::dict_lookup(&payload, lookup)?;
        Ok(payload.slice(range))
    }

    // ========================================================================
    // KEY OPERATIONS
    // ========================================================================

    /// Deletes a key. Removing an absent key is not an error.
    pub fn remove(&self, key: &[u8]) {
        self.del_count.fetch_add(1, Ordering::Relaxed);
        self.table.delete_raw(key);
    }

    /// Returns all stored keys, including expired keys nobody has read yet.
    ///
    /// See [`ShardTable::keys`] for the consistency contract.
    pub fn keys(&self) -> Vec<Bytes> {
        self.table.keys()
    }

    /// Number of stored records (expired-but-unread records included).
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns operation statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.table.len() as u64,
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

/// Engine statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of records currently stored
    pub keys: u64,
    /// Total read operations
    pub get_ops: u64,
    /// Total write operations
    pub set_ops: u64,
    /// Total REMOVE operations
    pub del_ops: u64,
    /// Total keys removed by lazy expiry
    pub expired: u64,
}
