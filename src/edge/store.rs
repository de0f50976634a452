//! Named cache stores.
//!
//! A [`CacheStorage`] holds any number of named [`CacheStore`]s, mirroring
//! how versioned caches are opened, listed and dropped as a whole. Every
//! operation is async so disk- and memory-backed stores share one interface.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::error::StoreError;

use super::entry::{CacheEntry, EntryMeta};

// =============================================================================
// Traits
// =============================================================================

/// A single keyed store of cached responses.
///
/// Concurrent writers to the same key race; the last write wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up an entry. Does not update any access timestamp.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or replace an entry.
    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError>;

    /// Remove an entry, returning whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Record a cache hit at `at`.
    async fn touch(&self, key: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Metadata for every entry, in no particular order.
    async fn entries(&self) -> Result<Vec<EntryMeta>, StoreError>;

    /// Whether `key` is present.
    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// A collection of named stores.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a store, creating it if needed.
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>, StoreError>;

    /// Delete a store and all its entries, returning whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, StoreError>;

    /// Names of all existing stores.
    async fn names(&self) -> Result<Vec<String>, StoreError>;
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        self.entries.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn touch(&self, key: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(entry) = self.entries.write().await.get_mut(key) {
            entry.last_accessed = at;
        }
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<EntryMeta>, StoreError> {
        Ok(self.entries.read().await.values().map(CacheEntry::meta).collect())
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.read().await.contains_key(key))
    }
}

/// In-memory collection of [`MemoryStore`]s.
#[derive(Default)]
pub struct MemoryCacheStorage {
    stores: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>, StoreError> {
        let mut stores = self.stores.lock().await;
        let store = stores
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new()))
            .clone();
        Ok(store)
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.stores.lock().await.remove(name).is_some())
    }

    async fn names(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.stores.lock().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

// =============================================================================
// Tests
// =============================================================================
