//! Disk-backed cache storage.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/<store-name>/<sha256(key)>.bin    response body
//! <root>/<store-name>/<sha256(key)>.json   EntryMeta
//! ```
//!
//! Files are written to a unique temporary name and renamed into place, body
//! first, so a reader never sees metadata pointing at a partial body. Writers
//! of one key are serialised by a striped lock shared by every store opened
//! from the same storage, so concurrent puts resolve to the last write.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::ErrorKind;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::StoreError;

use super::entry::{CacheEntry, EntryMeta};
use super::store::{CacheStorage, CacheStore};

/// Number of key lock stripes.
const LOCK_STRIPES: usize = 64;

/// Source of unique temporary file names.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Striped per-key locks. Keys hashing to the same stripe share a lock.
#[derive(Debug)]
struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    fn new() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    async fn lock(&self, digest: &[u8]) -> MutexGuard<'_, ()> {
        let stripe = digest.first().copied().unwrap_or(0) as usize % self.stripes.len();
        self.stripes[stripe].lock().await
    }
}

/// A collection of stores, one directory each.
#[derive(Debug, Clone)]
pub struct DiskCacheStorage {
    root: PathBuf,
    locks: Arc<KeyLocks>,
}

impl DiskCacheStorage {
    /// Create storage rooted at `root`, creating the directory.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            locks: Arc::new(KeyLocks::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, name: &str) -> Result<PathBuf, StoreError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StoreError::Io(format!("invalid store name: {:?}", name)));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>, StoreError> {
        let dir = self.store_dir(name)?;
        fs::create_dir_all(&dir).await?;
        Ok(Arc::new(DiskStore {
            dir,
            locks: Arc::clone(&self.locks),
        }))
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let dir = self.store_dir(name)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn names(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            if item.file_type().await?.is_dir() {
                if let Some(name) = item.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// One store directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
    locks: Arc<KeyLocks>,
}

/// File locations of one key.
struct EntryPaths {
    digest: Vec<u8>,
    body: PathBuf,
    meta: PathBuf,
}

impl DiskStore {
    fn paths(&self, key: &str) -> EntryPaths {
        let digest = Sha256::digest(key.as_bytes()).to_vec();
        let stem = hex::encode(&digest);
        EntryPaths {
            body: self.dir.join(format!("{}.bin", stem)),
            meta: self.dir.join(format!("{}.json", stem)),
            digest,
        }
    }

    async fn read_meta(path: &Path) -> Result<Option<EntryMeta>, StoreError> {
        match fs::read(path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_meta(path: &Path, meta: &EntryMeta) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(meta)?;
        write_atomic(path, &raw).await
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let paths = self.paths(key);
        let _guard = self.locks.lock(&paths.digest).await;

        let Some(meta) = Self::read_meta(&paths.meta).await? else {
            return Ok(None);
        };

        // Never serve another key's file.
        if meta.key != key {
            warn!(key = %key, stored = %meta.key, "Cache metadata key mismatch");
            return Ok(None);
        }

        match fs::read(&paths.body).await {
            Ok(body) => Ok(Some(meta.into_entry(Bytes::from(body)))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(key = %key, "Cache body missing for metadata");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        let paths = self.paths(&entry.key);
        let _guard = self.locks.lock(&paths.digest).await;

        write_atomic(&paths.body, &entry.body).await?;
        Self::write_meta(&paths.meta, &entry.meta()).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let paths = self.paths(key);
        let _guard = self.locks.lock(&paths.digest).await;

        let existed = remove_if_exists(&paths.meta).await?;
        remove_if_exists(&paths.body).await?;
        Ok(existed)
    }

    async fn touch(&self, key: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let paths = self.paths(key);
        let _guard = self.locks.lock(&paths.digest).await;

        if let Some(mut meta) = Self::read_meta(&paths.meta).await? {
            meta.last_accessed = at;
            Self::write_meta(&paths.meta, &meta).await?;
        }
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<EntryMeta>, StoreError> {
        let mut entries = Vec::new();
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match Self::read_meta(&path).await {
                Ok(Some(meta)) => entries.push(meta),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache metadata"),
            }
        }
        Ok(entries)
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(fs::try_exists(self.paths(key).meta).await?)
    }
}

/// Write `data` to a fresh `<name>.<n>.tmp` sibling and rename it over `path`.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(format!(".{}.tmp", TMP_COUNTER.fetch_add(1, Ordering::Relaxed)));
    let tmp = path.with_file_name(name);

    let written = match fs::write(&tmp, data).await {
        Ok(()) => fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
