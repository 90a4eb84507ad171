//! Bounded response cache for query endpoints.
//!
//! Entries live in a [`KeyValueStore`] under `useApi:<path>:<json-payload>`
//! as `{"data": ..., "timestamp": <epoch-ms>}`. An in-memory LRU index
//! bounds how many are kept; an optional TTL makes old entries invisible.

use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{KeyValueStore, StorageError};

/// Key prefix shared by every cached query response.
pub const QUERY_CACHE_PREFIX: &str = "useApi:";

/// A memoized query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Value,
    /// Epoch milliseconds when the entry was written.
    pub timestamp: i64,
}

/// Cache key for an endpoint and its request payload.
///
/// `Value` serializes objects with sorted keys, so equal payloads always
/// produce the same key.
#[must_use]
pub fn cache_key(endpoint: &str, payload: &Value) -> String {
    format!("{QUERY_CACHE_PREFIX}{endpoint}:{payload}")
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// LRU + TTL bounded cache over a key-value store.
pub struct QueryCache<S> {
    store: S,
    capacity: usize,
    ttl: Option<Duration>,
    /// Least recently used at the front.
    order: Mutex<VecDeque<String>>,
}

impl<S: KeyValueStore> QueryCache<S> {
    /// Create a cache with an empty index. Entries already in `store` are
    /// not tracked; use [`QueryCache::load`] to adopt them.
    #[must_use]
    pub fn new(store: S, capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            ttl,
            order: Mutex::new(VecDeque::new()),
        }
    }

    /// Create a cache and rebuild its index from entries already persisted,
    /// oldest first. Unreadable entries are dropped; surplus entries beyond
    /// `capacity` are evicted.
    ///
    /// # Errors
    /// Returns error if the store cannot list its keys.
    pub async fn load(store: S, capacity: usize, ttl: Option<Duration>) -> Result<Self, StorageError> {
        let cache = Self::new(store, capacity, ttl);

        let mut stamped = Vec::new();
        for key in cache.store.keys(QUERY_CACHE_PREFIX).await? {
            match cache.read_entry(&key).await {
                Some(entry) => stamped.push((entry.timestamp, key)),
                None => cache.discard(&key).await,
            }
        }
        stamped.sort();

        let evicted = {
            let mut order = cache.lock_order();
            order.extend(stamped.into_iter().map(|(_, key)| key));
            cache.trim(&mut order)
        };
        for key in evicted {
            cache.discard(&key).await;
        }

        tracing::debug!(entries = cache.len(), "query cache index loaded");
        Ok(cache)
    }

    /// Look up a fresh entry, marking it most recently used.
    ///
    /// Storage failures and expired or corrupted entries count as a miss.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let Some(entry) = self.read_entry(key).await else {
            self.forget(key);
            return None;
        };

        if self.is_expired(&entry) {
            tracing::debug!(key, "cached query response expired");
            self.forget(key);
            self.discard(key).await;
            return None;
        }

        self.touch(key);
        Some(entry)
    }

    /// Store `data` under `key`, overwriting any previous entry.
    ///
    /// Persistence failures are logged, not returned.
    pub async fn put(&self, key: &str, data: Value) {
        let entry = CacheEntry {
            data,
            timestamp: now_ms(),
        };
        let serialized = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to serialize query cache entry");
                return;
            }
        };
        if let Err(e) = self.store.set(key, serialized).await {
            tracing::warn!(key, error = %e, "failed to write query cache entry");
            return;
        }

        let evicted = self.touch(key);
        for old in evicted {
            tracing::debug!(key = %old, "evicting least recently used query response");
            self.discard(&old).await;
        }
    }

    /// Number of tracked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_order().len()
    }

    /// True when nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    async fn read_entry(&self, key: &str) -> Option<CacheEntry> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to read query cache entry");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(key, error = %e, "corrupted query cache entry, ignoring");
                None
            }
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.ttl.is_some_and(|ttl| {
            let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            now_ms().saturating_sub(entry.timestamp) > ttl_ms
        })
    }

    /// Move `key` to the most recently used end; returns keys pushed out.
    fn touch(&self, key: &str) -> Vec<String> {
        let mut order = self.lock_order();
        if let Some(pos) = order.iter().position(|k| k == key) {
            order.remove(pos);
        }
        order.push_back(key.to_string());
        self.trim(&mut order)
    }

    fn forget(&self, key: &str) {
        let mut order = self.lock_order();
        if let Some(pos) = order.iter().position(|k| k == key) {
            order.remove(pos);
        }
    }

    fn trim(&self, order: &mut VecDeque<String>) -> Vec<String> {
        let mut evicted = Vec::new();
        while order.len() > self.capacity {
            if let Some(front) = order.pop_front() {
                evicted.push(front);
            }
        }
        evicted
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.store.remove(key).await {
            tracing::warn!(key, error = %e, "failed to remove query cache entry");
        }
    }

    fn lock_order(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.order.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
