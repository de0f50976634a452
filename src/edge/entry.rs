//! Cached response entries.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached response, keyed by absolute request URL.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Absolute request URL including the query string
    pub key: String,

    /// Response body
    pub body: Bytes,

    /// Response `Content-Type`
    pub content_type: String,

    /// When the entry was written
    pub cached_at: DateTime<Utc>,

    /// Last cache hit (only maintained under LRU eviction)
    pub last_accessed: DateTime<Utc>,

    /// Cache-format version tag
    pub version: String,
}

impl CacheEntry {
    /// Create an entry stamped with the current time.
    pub fn new(
        key: impl Into<String>,
        body: Bytes,
        content_type: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            body,
            content_type: content_type.into(),
            cached_at: now,
            last_accessed: now,
            version: version.into(),
        }
    }

    /// Override the write timestamp.
    pub fn with_cached_at(mut self, cached_at: DateTime<Utc>) -> Self {
        self.cached_at = cached_at;
        self.last_accessed = cached_at;
        self
    }

    /// Stored length in bytes.
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }

    /// Time since the entry was written; zero if the clock went backwards.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.cached_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Metadata view used for enumeration and eviction.
    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            key: self.key.clone(),
            content_type: self.content_type.clone(),
            size: self.size(),
            cached_at: self.cached_at,
            last_accessed: self.last_accessed,
            version: self.version.clone(),
        }
    }
}

/// Entry metadata without the body.
///
/// This is also the on-disk metadata record of the disk store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub key: String,
    pub content_type: String,
    pub size: u64,
    pub cached_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub version: String,
}

impl EntryMeta {
    /// Rebuild the full entry around a body.
    pub fn into_entry(self, body: Bytes) -> CacheEntry {
        CacheEntry {
            key: self.key,
            body,
            content_type: self.content_type,
            cached_at: self.cached_at,
            last_accessed: self.last_accessed,
            version: self.version,
        }
    }
}
