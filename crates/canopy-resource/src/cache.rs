//! Append-only resource caches
//!
//! One cache per resource kind. Entries are only ever appended; nothing is
//! invalidated while the owning manager lives.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

use crate::bundle::split_node_key;

/// Cache for a keyed resource kind.
#[derive(Debug, Default)]
pub struct KeyedCache {
    entries: RwLock<HashMap<String, Value>>,
}

impl KeyedCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` has been loaded.
    pub fn exists(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Loaded value for `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    /// Append entries. Existing keys keep their first value.
    pub fn append(&self, entries: impl IntoIterator<Item = (String, Value)>) -> usize {
        let mut cache = self.entries.write();
        let mut added = 0;
        for (key, value) in entries {
            if let std::collections::hash_map::Entry::Vacant(slot) = cache.entry(key) {
                slot.insert(value);
                added += 1;
            }
        }
        added
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Test harnesses only.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// Cache for context payloads: resource name -> node id -> payload.
#[derive(Debug, Default)]
pub struct ContextCache {
    entries: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl ContextCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a payload for `node` under `name` has been loaded.
    pub fn exists(&self, name: &str, node: &str) -> bool {
        self.entries
            .read()
            .get(name)
            .is_some_and(|handler| handler.contains_key(node))
    }

    /// Loaded payload for `node` under `name`.
    pub fn get(&self, name: &str, node: &str) -> Option<Value> {
        self.entries
            .read()
            .get(name)
            .and_then(|handler| handler.get(node))
            .cloned()
    }

    /// Append the payloads of one resource name.
    ///
    /// Coalesced node keys are split so every id can be looked up on its own.
    pub fn append(&self, name: &str, entries: impl IntoIterator<Item = (String, Value)>) -> usize {
        let mut cache = self.entries.write();
        let handler = cache.entry(name.to_string()).or_default();
        let mut added = 0;
        for (key, payload) in entries {
            for id in split_node_key(&key) {
                if !handler.contains_key(id) {
                    handler.insert(id.to_string(), payload.clone());
                    added += 1;
                }
            }
        }
        added
    }

    /// Number of cached (name, node) pairs.
    pub fn len(&self) -> usize {
        self.entries.read().values().map(HashMap::len).sum()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Test harnesses only.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries per keyed kind plus context pairs
    pub entries: usize,
    /// Fetch requests issued through the strategy
    pub requests: u64,
    /// Keys sent across all requests
    pub keys_requested: u64,
    /// Keys skipped because they were cached or in flight
    pub keys_skipped: u64,
}
