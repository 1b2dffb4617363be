//! Lookup cache shared between concurrent requests

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};

/// Map from key to resolved value, guarded by its own lock.
///
/// [`ResolveCache::get_or_compute`] checks, fills and reads under one lock
/// acquisition, so concurrent requests never resolve the same key twice.
#[derive(Debug)]
pub struct ResolveCache<K, V> {
    entries: Mutex<HashMap<K, V>>,
}

impl<K: Eq + Hash, V: Clone> ResolveCache<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// Failed computations are not cached.
    pub fn get_or_compute<F, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce(&K) -> Result<V, E>,
    {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = entries.get(&key) {
            return Ok(value.clone());
        }
        let value = compute(&key)?;
        entries.insert(key, value.clone());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl<K: Eq + Hash, V: Clone> Default for ResolveCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
