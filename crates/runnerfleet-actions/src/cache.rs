//! TTL cache for tokens and other API lookups.
//!
//! Entries carry an absolute expiration time. Reads treat expired entries as
//! absent; expired entries are pruned on every write. The map is guarded by
//! a single lock that is never held across an await point.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use runnerfleet_state::CacheEntry;

/// A string-keyed map of [`CacheEntry`] values.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V> Default for TtlCache<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value if present and not expired at `now`.
    pub fn get(&self, key: &str, now: u64) -> Option<V> {
        let entries = self.lock();
        entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// Insert a value that stops being readable at `expiration_time`.
    pub fn insert(&self, key: &str, value: V, expiration_time: u64, now: u64) {
        let mut entries = self.lock();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value,
                expiration_time,
            },
        );
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.lock().remove(key).map(|entry| entry.value)
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
