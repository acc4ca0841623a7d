//! KeyDir implementation
//!
//! Sharded HashMap with one RwLock per shard.

use std::collections::hash_map::RandomState;
use std::collections::{BTreeSet, HashMap};
use std::hash::BuildHasher;

use parking_lot::RwLock;

use super::IndexEntry;

/// Number of independently locked shards
const SHARD_COUNT: usize = 16;

/// Concurrent key → location index
pub struct KeyDir {
    shards: Vec<RwLock<HashMap<String, IndexEntry>>>,
    hasher: RandomState,
}

impl KeyDir {
    /// Create an empty KeyDir
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, key: &str) -> &RwLock<HashMap<String, IndexEntry>> {
        let idx = (self.hasher.hash_one(key) as usize) % SHARD_COUNT;
        &self.shards[idx]
    }

    /// Look up the current location of `key`
    pub fn get(&self, key: &str) -> Option<IndexEntry> {
        self.shard(key).read().get(key).copied()
    }

    /// Replace the entry for `key`, returning the previous one
    pub fn put(&self, key: String, entry: IndexEntry) -> Option<IndexEntry> {
        self.shard(&key).write().insert(key, entry)
    }

    /// Install `entry` only if it is newer than the current one
    ///
    /// Returns true if the index changed.
    pub fn put_if_newer(&self, key: String, entry: IndexEntry) -> bool {
        let mut shard = self.shard(&key).write();
        match shard.get(&key) {
            Some(current) if !entry.supersedes(current) => false,
            _ => {
                shard.insert(key, entry);
                true
            }
        }
    }

    /// Replace the entry for `key` only if it still equals `expected`
    pub fn replace_if_current(&self, key: &str, expected: &IndexEntry, entry: IndexEntry) -> bool {
        let mut shard = self.shard(key).write();
        match shard.get_mut(key) {
            Some(current) if current == expected => {
                *current = entry;
                true
            }
            _ => false,
        }
    }

    /// Remove `key` entirely (from memory only)
    pub fn remove(&self, key: &str) -> Option<IndexEntry> {
        self.shard(key).write().remove(key)
    }

    /// Keep only the entries for which `keep` returns true
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&str, &IndexEntry) -> bool,
    {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.write();
            let before = shard.len();
            shard.retain(|k, e| keep(k, e));
            removed += before - shard.len();
        }
        removed
    }

    /// Copy of every entry, taken shard by shard
    ///
    /// Weakly consistent against concurrent writers; callers needing a
    /// point-in-time view hold the engine's write lock.
    pub fn snapshot(&self) -> Vec<(String, IndexEntry)> {
        let mut out = Vec::with_capacity(self.len());
        for shard in &self.shards {
            let shard = shard.read();
            out.extend(shard.iter().map(|(k, e)| (k.clone(), *e)));
        }
        out
    }

    /// Keys whose newest record is a PUT
    pub fn live_keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        for shard in &self.shards {
            let shard = shard.read();
            keys.extend(
                shard
                    .iter()
                    .filter(|(_, e)| !e.is_tombstone())
                    .map(|(k, _)| k.clone()),
            );
        }
        keys
    }

    /// Number of indexed keys, tombstones included
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }
}

impl Default for KeyDir {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
