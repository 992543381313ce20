//! Locked Map - a HashMap behind one reader/writer lock
//!
//! The lighter sibling of [`ShardedMap`](super::ShardedMap) for maps that are
//! small or rarely contended. Every operation takes the same lock.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;

/// Concurrent map guarded by a single lock
#[derive(Debug)]
pub struct LockedMap<K, V> {
    storage: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for LockedMap<K, V> {
    fn default() -> Self {
        Self {
            storage: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> LockedMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value, returning the previous one
    pub fn store(&self, key: K, value: V) -> Option<V> {
        self.storage.write().insert(key, value)
    }

    pub fn load(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.storage.read().get(key).cloned()
    }

    /// Return the existing value, or insert `value` if absent
    ///
    /// The flag is `true` when the value was already present.
    pub fn load_or_store(&self, key: K, value: V) -> (V, bool)
    where
        V: Clone,
    {
        let mut storage = self.storage.write();
        if let Some(existing) = storage.get(&key) {
            return (existing.clone(), true);
        }
        storage.insert(key, value.clone());
        (value, false)
    }

    /// Mutate the value for `key` in place under the write lock
    ///
    /// `init` creates the value when the key is absent.
    pub fn upsert_with<I, F, R>(&self, key: K, init: I, f: F) -> R
    where
        I: FnOnce() -> V,
        F: FnOnce(&mut V) -> R,
    {
        let mut storage = self.storage.write();
        f(storage.entry(key).or_insert_with(init))
    }

    pub fn delete(&self, key: &K) -> Option<V> {
        self.storage.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.storage.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.read().is_empty()
    }

    /// Snapshot of all values
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.storage.read().values().cloned().collect()
    }

    /// Visit entries under the read lock until `f` returns `false`
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let storage = self.storage.read();
        for (k, v) in storage.iter() {
            if !f(k, v) {
                break;
            }
        }
    }

    /// Copy of the whole map
    pub fn snapshot(&self) -> HashMap<K, V>
    where
        K: Clone,
        V: Clone,
    {
        self.storage.read().clone()
    }
}
