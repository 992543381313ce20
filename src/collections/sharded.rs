//! Sharded Map - N independently locked partitions
//!
//! Keys are routed to a shard by a caller-supplied sharding function, so
//! writers to different shards never contend. Snapshot operations (`keys`,
//! `values`) visit shards one at a time and never hold more than one lock.
//!
//! # Usage
//! ```ignore
//! let map: ShardedMap<u64, String> = ShardedMap::new(16, |k: &u64| *k as usize);
//! map.store(7, "seven".to_string());
//! assert_eq!(map.load(&7).as_deref(), Some("seven"));
//! ```

use parking_lot::RwLock;
use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Maps a key to a shard index. The result is taken modulo the shard count.
pub type ShardFn<K> = dyn Fn(&K) -> usize + Send + Sync;

/// Concurrent map partitioned into independently locked shards
pub struct ShardedMap<K, V> {
    shards: Vec<RwLock<HashMap<K, V>>>,
    shard_fn: Box<ShardFn<K>>,
}

impl<K, V> ShardedMap<K, V>
where
    K: Eq + Hash,
{
    /// Create a map with `shards` partitions routed by `shard_fn`
    ///
    /// A shard count of zero is treated as one.
    pub fn new<F>(shards: usize, shard_fn: F) -> Self
    where
        F: Fn(&K) -> usize + Send + Sync + 'static,
    {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| RwLock::new(HashMap::new())).collect(),
            shard_fn: Box::new(shard_fn),
        }
    }

    /// Create a map routed by the key's `Hash` implementation
    pub fn with_shards(shards: usize) -> Self
    where
        K: 'static,
    {
        Self::new(shards, |key: &K| {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            hasher.finish() as usize
        })
    }

    /// Create a map with a single shard: every operation takes the same lock
    pub fn single() -> Self
    where
        K: 'static,
    {
        Self::new(1, |_: &K| 0)
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<K, V>> {
        let idx = (self.shard_fn)(key) % self.shards.len();
        &self.shards[idx]
    }

    /// Insert or replace a value, returning the previous one
    pub fn store(&self, key: K, value: V) -> Option<V> {
        self.shard(&key).write().insert(key, value)
    }

    /// Get a copy of the value for `key`
    pub fn load(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.shard(key).read().get(key).cloned()
    }

    /// Return the existing value, or insert `value` if absent
    ///
    /// The flag is `true` when the value was already present.
    pub fn load_or_store(&self, key: K, value: V) -> (V, bool)
    where
        V: Clone,
    {
        let mut shard = self.shard(&key).write();
        match shard.entry(key) {
            Entry::Occupied(e) => (e.get().clone(), true),
            Entry::Vacant(e) => (e.insert(value).clone(), false),
        }
    }

    /// Mutate the value for `key` in place under the shard's write lock
    ///
    /// `init` creates the value when the key is absent.
    pub fn upsert_with<I, F, R>(&self, key: K, init: I, f: F) -> R
    where
        I: FnOnce() -> V,
        F: FnOnce(&mut V) -> R,
    {
        let mut shard = self.shard(&key).write();
        f(shard.entry(key).or_insert_with(init))
    }

    /// Remove a key, returning its value
    pub fn delete(&self, key: &K) -> Option<V> {
        self.shard(key).write().remove(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.shard(key).read().contains_key(key)
    }

    /// Total number of entries across all shards
    pub fn count(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    /// Snapshot of all keys
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        let mut keys = Vec::with_capacity(self.count());
        for shard in &self.shards {
            keys.extend(shard.read().keys().cloned());
        }
        keys
    }

    /// Snapshot of all values
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        let mut values = Vec::with_capacity(self.count());
        for shard in &self.shards {
            values.extend(shard.read().values().cloned());
        }
        values
    }

    /// Drain every shard, returning owned values
    pub fn into_values(self) -> Vec<V> {
        self.shards
            .into_iter()
            .flat_map(|s| s.into_inner().into_values())
            .collect()
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }
}
