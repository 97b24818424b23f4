//! In-memory backing store.

use indexmap::IndexMap;

use super::{Key, Store};

/// Insertion-ordered in-memory store.
///
/// Removing a key keeps the relative order of the remaining entries, so
/// `entries()` always lists keys in the order they were first written.
#[derive(Debug, Clone)]
pub struct MemoryStore<V> {
    entries: IndexMap<Key, V>,
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity),
        }
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Store<V> for MemoryStore<V>
where
    V: Clone + Send + Sync,
{
    fn get(&self, key: &Key) -> Option<V> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: Key, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    fn remove(&mut self, key: &Key) -> Option<V> {
        self.entries.shift_remove(key)
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn count(&self) -> usize {
        self.entries.len()
    }

    fn contains(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    fn keys(&self) -> Vec<Key> {
        self.entries.keys().cloned().collect()
    }

    fn entries(&self) -> Vec<(Key, V)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
