//! # Response Caching Module
//!
//! Deterministic response caching for cacheable GET requests, keyed by
//! request [fingerprints](crate::fingerprint).
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheStore`] | Trait implemented by cache backends (get/set/delete/clear) |
//! | [`MemoryCache`] | In-memory TTL cache with bounded capacity |
//! | [`NullCache`] | No-op store for disabling caching entirely |
//!
//! The store is a process-wide shared collaborator: a single instance may
//! back several clients, which is why [`crate::ApiClient::clear_cache`]
//! without arguments clears the *entire* store, not a private namespace.

mod backend;

pub use backend::{CacheStore, MemoryCache, NullCache};
