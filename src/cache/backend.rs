//! Cache store trait and backend implementations.

use crate::fingerprint::Fingerprint;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Shared cache collaborator. Implementations must be safe for concurrent
/// use; a failing external backend should degrade to a miss (`get` returns
/// `None`, `set` becomes a no-op) rather than surface its own error type.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &Fingerprint) -> Option<Value>;
    async fn set(&self, key: &Fingerprint, value: Value, ttl: Duration);
    async fn delete(&self, key: &Fingerprint) -> bool;
    async fn clear(&self);
}

struct Entry {
    value: Value,
    expires_at: Instant,
    last_accessed: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-memory TTL cache with a bounded entry count. When full, expired
/// entries are dropped first, then the least recently accessed.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
        }
    }

    /// Number of live (non-expired) entries.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("cache lock poisoned")
            .values()
            .filter(|e| !e.is_expired())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_if_needed(&self, entries: &mut HashMap<String, Entry>) {
        entries.retain(|_, e| !e.is_expired());
        while entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    entries.remove(&k);
                }
                None => break,
            }
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &Fingerprint) -> Option<Value> {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        match entries.get_mut(key.as_str()) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key.as_str());
                None
            }
            Some(entry) => {
                entry.last_accessed = Instant::now();
                Some(entry.value.clone())
            }
            None => None,
        }
    }

    async fn set(&self, key: &Fingerprint, value: Value, ttl: Duration) {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        self.evict_if_needed(&mut entries);
        let now = Instant::now();
        entries.insert(
            key.as_str().to_string(),
            Entry {
                value,
                expires_at: now + ttl,
                last_accessed: now,
            },
        );
    }

    async fn delete(&self, key: &Fingerprint) -> bool {
        self.entries
            .write()
            .expect("cache lock poisoned")
            .remove(key.as_str())
            .is_some()
    }

    async fn clear(&self) {
        self.entries.write().expect("cache lock poisoned").clear();
    }
}

/// No-op store: every lookup misses, every write is discarded.
pub struct NullCache;

#[async_trait]
impl CacheStore for NullCache {
    async fn get(&self, _key: &Fingerprint) -> Option<Value> {
        None
    }
    async fn set(&self, _key: &Fingerprint, _value: Value, _ttl: Duration) {}
    async fn delete(&self, _key: &Fingerprint) -> bool {
        false
    }
    async fn clear(&self) {}
}
