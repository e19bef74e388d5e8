//! Sharded Record Table
//!
//! The table is split into 256 partitions, each a `HashMap` behind its own
//! `RwLock`. A key's partition is the low byte of its 64-bit FNV-1a hash, so
//! the assignment is stable across processes and never changes.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ShardTable                             │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐       ┌───────────┐   │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │  ...  │ Shard 255 │   │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │       │ RwLock    │   │
//! │  │ HashMap │ │ HashMap │ │ HashMap │       │ HashMap   │   │
//! │  └─────────┘ └─────────┘ └─────────┘       └───────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Values are opaque encoded records. The table knows nothing about types or
//! expiry; that lives in the engine.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Number of partitions. Fixed: the partition id is a single byte.
pub const NUM_SHARDS: usize = 256;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a hash.
#[inline]
pub fn fnv1a_64(data: &[u8]) -> u64 {
    data.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
    })
}

/// Returns the partition a key belongs to.
#[inline]
pub fn shard_of(key: &[u8]) -> u8 {
    (fnv1a_64(key) & 0xff) as u8
}

type Shard = RwLock<HashMap<Bytes, Bytes>>;

/// 256 independently locked maps from key to encoded record.
pub struct ShardTable {
    shards: Vec<Shard>,
}

impl std::fmt::Debug for ShardTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardTable")
            .field("shards", &self.shards.len())
            .finish()
    }
}

impl Default for ShardTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardTable {
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| RwLock::new(HashMap::new())).collect();
        Self { shards }
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        &self.shards[shard_of(key) as usize]
    }

    /// Returns the record stored under `key`, if any.
    pub fn get_raw(&self, key: &[u8]) -> Option<Bytes> {
        self.shard(key).read().get(key).cloned()
    }

    /// Inserts or overwrites the record stored under `key`.
    pub fn put_raw(&self, key: Bytes, record: Bytes) {
        self.shard(&key).write().insert(key, record);
    }

    /// Removes `key`. Returns `true` if it was present.
    pub fn delete_raw(&self, key: &[u8]) -> bool {
        self.shard(key).write().remove(key).is_some()
    }

    /// Removes `key` only if `predicate` holds for its current record.
    ///
    /// The partition's write lock is held across the check and the removal.
    pub fn delete_if<F>(&self, key: &[u8], predicate: F) -> bool
    where
        F: FnOnce(&Bytes) -> bool,
    {
        let mut shard = self.shard(key).write();
        match shard.get(key) {
            Some(record) if predicate(record) => {
                shard.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Collects every key in the table.
    ///
    /// Partitions are visited one at a time, each locked only while it is
    /// being copied. The result is not a snapshot: keys written to other
    /// partitions during the scan may or may not appear.
    pub fn keys(&self) -> Vec<Bytes> {
        let mut keys = Vec::new();
        for shard in &self.shards {
            let shard = shard.write();
            keys.extend(shard.keys().cloned());
        }
        keys
    }

    /// Number of stored records, with the same consistency as [`keys`](Self::keys).
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63dc4c8601ec8c);
        assert_eq!(fnv1a_64(b"foobar"), 0x85944171f73967e8);
    }

    #[test]
    fn test_shard_of_is_low_byte() {
        assert_eq!(shard_of(b"a"), 0x8c);
        assert_eq!(shard_of(b"foobar"), 0xe8);
        assert_eq!(shard_of(b"foobar"), shard_of(b"foobar"));
    }

    #[test]
    fn test_put_get_delete() {
        let table = ShardTable::new();
        assert!(table.is_empty());

        table.put_raw(Bytes::from("key"), Bytes::from("v1"));
        assert_eq!(table.get_raw(b"key"), Some(Bytes::from("v1")));

        table.put_raw(Bytes::from("key"), Bytes::from("v2"));
        assert_eq!(table.get_raw(b"key"), Some(Bytes::from("v2")));
        assert_eq!(table.len(), 1);

        assert!(table.delete_raw(b"key"));
        assert!(!table.delete_raw(b"key"));
        assert_eq!(table.get_raw(b"key"), None);
    }

    #[test]
    fn test_delete_if() {
        let table = ShardTable::new();
        table.put_raw(Bytes::from("key"), Bytes::from("keep"));

        assert!(!table.delete_if(b"key", |record| record == "drop"));
        assert_eq!(table.get_raw(b"key"), Some(Bytes::from("keep")));

        assert!(table.delete_if(b"key", |record| record == "keep"));
        assert_eq!(table.get_raw(b"key"), None);

        assert!(!table.delete_if(b"missing", |_| true));
    }

    #[test]
    fn test_keys_spans_all_shards() {
        let table = ShardTable::new();
        let mut expected = HashSet::new();
        let mut used = HashSet::new();

        for i in 0..2048 {
            let key = Bytes::from(format!("key-{}", i));
            used.insert(shard_of(&key));
            expected.insert(key.clone());
            table.put_raw(key, Bytes::from_static(b"x"));
        }

        assert_eq!(used.len(), NUM_SHARDS);
        let keys: HashSet<Bytes> = table.keys().into_iter().collect();
        assert_eq!(keys, expected);
        assert_eq!(table.len(), 2048);
    }

    #[test]
    fn test_concurrent_disjoint_writers() {
        let table = Arc::new(ShardTable::new());
        let mut handles = vec![];

        for i in 0..8 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                for j in 0..500 {
                    let key = Bytes::from(format!("t{}-{}", i, j));
                    table.put_raw(key.clone(), key.clone());
                    assert_eq!(table.get_raw(&key), Some(key));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.len(), 4000);
    }
}
