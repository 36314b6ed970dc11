//! Keyed in-memory registry with one lock per entry.
//!
//! The shard lock of the underlying `DashMap` is only held long enough to
//! clone the entry handle; all reads and writes of the value itself go through
//! the entry's own `RwLock`. Writers to one key therefore never block readers
//! or writers of another key.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

/// Generate an opaque identifier of the form `<prefix>_<8 hex chars>`.
pub fn generate_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &hex[..8])
}

pub struct Registry<V> {
    entries: DashMap<String, Arc<RwLock<V>>>,
}

impl<V> Registry<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert `value` under `key` unless the key is already taken.
    /// Returns `false` (and drops `value`) on collision.
    pub fn insert_new(&self, key: String, value: V) -> bool {
        match self.entries.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(RwLock::new(value)));
                true
            }
        }
    }

    /// Shared handle to the entry lock.
    pub fn handle(&self, key: &str) -> Option<Arc<RwLock<V>>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Run `f` against a consistent snapshot of the entry.
    pub fn read<R>(&self, key: &str, f: impl FnOnce(&V) -> R) -> Option<R> {
        let handle = self.handle(key)?;
        let guard = handle.read();
        Some(f(&guard))
    }

    /// Run `f` with exclusive access to the entry.
    pub fn write<R>(&self, key: &str, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let handle = self.handle(key)?;
        let mut guard = handle.write();
        Some(f(&mut guard))
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Default for Registry<V> {
    fn default() -> Self {
        Self::new()
    }
}
