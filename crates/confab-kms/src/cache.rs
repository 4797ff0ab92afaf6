//! Resolved key cache.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::wire::Key;

/// Keys by URI.
///
/// Keys are immutable once issued, so entries never expire. Reads vastly
/// outnumber writes.
#[derive(Debug, Default)]
pub struct KeyCache {
    keys: RwLock<HashMap<String, Key>>,
}

impl KeyCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached key for `uri`.
    pub fn get(&self, uri: &str) -> Option<Key> {
        self.keys.read().get(uri).cloned()
    }

    /// Insert or replace a key. `None` and keys with an empty URI are
    /// ignored.
    pub fn cache_key(&self, key: Option<Key>) {
        let Some(key) = key else {
            return;
        };
        if key.uri.is_empty() {
            return;
        }
        self.keys.write().insert(key.uri.clone(), key);
    }

    /// Remove and return the key for `uri`.
    pub fn remove(&self, uri: &str) -> Option<Key> {
        self.keys.write().remove(uri)
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}
