//! The edge cache manager.
//!
//! One manager fronts one origin. It owns two named stores (images and the
//! image manifest), decides per request whether to answer from cache, and
//! runs the prefetch/preload/clear/stats operations driven by the control
//! channel.
//!
//! # Request flow
//!
//! ```text
//! request ──► intercept ──┬─ image prefix ──► handle_image_request
//!                         ├─ manifest file ─► handle_manifest_request
//!                         └─ otherwise ─────► PassThrough
//! ```
//!
//! Image failures never reach the caller: timeouts, network errors and
//! non-OK statuses all produce a 1x1 transparent PNG.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{EdgeError, FetchError, StoreError};
use crate::hints::FetchPriority;

use super::entry::CacheEntry;
use super::network::NetworkInfo;
use super::store::{CacheStorage, CacheStore};
use super::upstream::{Upstream, UpstreamRequest, UpstreamResponse};

/// Response header reporting how the edge answered.
pub const EDGE_CACHE_HEADER: &str = "x-edge-cache";

/// Response header set on the synthetic fallback image.
pub const FALLBACK_HEADER: &str = "x-fallback-image";

/// 1x1 transparent PNG served when an image cannot be fetched.
pub const FALLBACK_IMAGE: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0B, 0x49, 0x44, 0x41, 0x54, 0x78, 0xDA, 0x63, 0x60, 0x00, 0x02, 0x00,
    0x00, 0x05, 0x00, 0x01, 0xE9, 0xFA, 0xDC, 0xD8, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44,
    0xAE, 0x42, 0x60, 0x82,
];

/// Content type of [`FALLBACK_IMAGE`].
pub const FALLBACK_CONTENT_TYPE: &str = "image/png";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

// =============================================================================
// Configuration
// =============================================================================

/// Which entries are evicted first when the image store is over its ceiling.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    /// Oldest `cached_at` first; reads never protect an entry
    #[default]
    OldestFirst,

    /// Least recently read first; every hit refreshes `last_accessed`
    LeastRecentlyUsed,
}

/// Edge cache settings.
#[derive(Debug, Clone)]
pub struct EdgeCacheConfig {
    /// Prefix shared by every store this manager owns
    pub cache_prefix: String,

    /// Cache-format version tag
    pub version: String,

    /// Ceiling for the image store, in bytes
    pub max_size: u64,

    /// Image entries older than this are refreshed in the background
    pub max_age: Duration,

    /// Manifest entries older than this are refreshed in the background
    pub manifest_ttl: Duration,

    /// Timeout for image fetches
    pub fetch_timeout: Duration,

    /// Share of entries (by count) removed by one eviction pass
    pub eviction_fraction: f64,

    pub eviction_policy: EvictionPolicy,

    /// Requests whose path starts with this are image requests
    pub image_path_prefix: String,

    /// Requests whose path ends with this are manifest requests
    pub manifest_suffix: String,

    /// Prefetch batch size on the fastest connection class
    pub fast_batch_size: usize,

    /// Prefetch batch size otherwise
    pub slow_batch_size: usize,

    /// Pause between prefetch batches, skipped on the fastest class
    pub batch_pause: Duration,
}

impl Default for EdgeCacheConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "image-cache".to_string(),
            version: "v1".to_string(),
            max_size: 100 * 1024 * 1024,
            max_age: Duration::from_secs(24 * 60 * 60),
            manifest_ttl: Duration::from_secs(60 * 60),
            fetch_timeout: Duration::from_secs(10),
            eviction_fraction: 0.25,
            eviction_policy: EvictionPolicy::OldestFirst,
            image_path_prefix: "/transcode".to_string(),
            manifest_suffix: "image-manifest.json".to_string(),
            fast_batch_size: 5,
            slow_batch_size: 2,
            batch_pause: Duration::from_millis(100),
        }
    }
}

impl EdgeCacheConfig {
    /// Name of the primary image store.
    pub fn images_store_name(&self) -> String {
        format!("{}-images-{}", self.cache_prefix, self.version)
    }

    /// Name of the manifest store.
    pub fn manifest_store_name(&self) -> String {
        format!("{}-manifest-{}", self.cache_prefix, self.version)
    }

    /// Path fetched when warming the manifest store.
    pub fn manifest_path(&self) -> String {
        format!("/{}", self.manifest_suffix.trim_start_matches('/'))
    }

    /// Whether `name` is an images or manifest store of this prefix, at
    /// any version.
    fn owns_store(&self, name: &str) -> bool {
        ["images", "manifest"].iter().any(|kind| {
            name.strip_prefix(&format!("{}-{}-", self.cache_prefix, kind))
                .is_some_and(|version| !version.is_empty())
        })
    }
}

// =============================================================================
// Results
// =============================================================================

/// How a handled request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Fallback,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Fallback => "fallback",
        }
    }
}

/// A response produced by the edge itself.
#[derive(Debug, Clone)]
pub struct EdgeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub cache_status: Option<CacheStatus>,
}

impl EdgeResponse {
    fn cached(entry: CacheEntry) -> Self {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, CONTENT_TYPE, &entry.content_type);
        Self::tagged(StatusCode::OK, headers, entry.body, CacheStatus::Hit)
    }

    fn fetched(response: UpstreamResponse) -> Self {
        Self::tagged(
            response.status,
            response.headers,
            response.body,
            CacheStatus::Miss,
        )
    }

    fn fallback() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(FALLBACK_CONTENT_TYPE));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(FALLBACK_HEADER, HeaderValue::from_static("true"));
        Self::tagged(
            StatusCode::OK,
            headers,
            Bytes::from_static(FALLBACK_IMAGE),
            CacheStatus::Fallback,
        )
    }

    fn status_only(status: StatusCode) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        Self {
            status,
            headers,
            body: Bytes::new(),
            cache_status: None,
        }
    }

    fn tagged(status: StatusCode, mut headers: HeaderMap, body: Bytes, tag: CacheStatus) -> Self {
        headers.insert(EDGE_CACHE_HEADER, HeaderValue::from_static(tag.as_str()));
        Self {
            status,
            headers,
            body,
            cache_status: Some(tag),
        }
    }
}

/// Outcome of offering a request to the manager.
#[derive(Debug)]
pub enum Intercepted {
    /// The edge answered the request
    Handled(EdgeResponse),

    /// The request is not ours; forward it untouched
    PassThrough,
}

/// Outcome of one size-management pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub entries_before: usize,
    pub removed: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// Per-call summary of a prefetch or critical preload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchReport {
    pub requested: usize,
    pub fetched: usize,
    pub already_cached: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Image store statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub image_count: usize,
    pub total_size: u64,
    pub max_size: u64,
    pub utilization: String,
}

impl CacheStats {
    fn new(image_count: usize, total_size: u64, max_size: u64) -> Self {
        let ratio = if max_size == 0 {
            0.0
        } else {
            total_size as f64 / max_size as f64 * 100.0
        };
        Self {
            image_count,
            total_size,
            max_size,
            utilization: format!("{:.2}%", ratio),
        }
    }
}

enum Warmed {
    Fetched,
    AlreadyCached,
    Failed,
}

// =============================================================================
// Manager
// =============================================================================

/// Caching front for one origin.
pub struct EdgeCacheManager {
    config: EdgeCacheConfig,
    origin: Url,
    storage: Arc<dyn CacheStorage>,
    upstream: Arc<dyn Upstream>,
    images: RwLock<Arc<dyn CacheStore>>,
    manifest: RwLock<Arc<dyn CacheStore>>,
    active: AtomicBool,
    network: watch::Sender<NetworkInfo>,
    /// Keys with a background refresh in flight
    refreshing: Mutex<HashSet<String>>,
}

impl EdgeCacheManager {
    /// Open (or create) both stores. The manager passes every request
    /// through until [`activate`](Self::activate) is called.
    pub async fn install(
        config: EdgeCacheConfig,
        origin: Url,
        storage: Arc<dyn CacheStorage>,
        upstream: Arc<dyn Upstream>,
    ) -> Result<Arc<Self>, EdgeError> {
        let images = storage.open(&config.images_store_name()).await?;
        let manifest = storage.open(&config.manifest_store_name()).await?;
        let (network, _) = watch::channel(NetworkInfo::default());

        info!(
            origin = %origin,
            images = %config.images_store_name(),
            manifest = %config.manifest_store_name(),
            "Edge cache installed"
        );

        Ok(Arc::new(Self {
            config,
            origin,
            storage,
            upstream,
            images: RwLock::new(images),
            manifest: RwLock::new(manifest),
            active: AtomicBool::new(false),
            network,
            refreshing: Mutex::new(HashSet::new()),
        }))
    }

    /// Drop stale versioned stores, start intercepting, and warm the
    /// manifest in the background. Returns the deleted store names.
    pub async fn activate(self: &Arc<Self>) -> Result<Vec<String>, EdgeError> {
        let current = [
            self.config.images_store_name(),
            self.config.manifest_store_name(),
        ];

        let mut deleted = Vec::new();
        for name in self.storage.names().await? {
            if self.config.owns_store(&name) && !current.contains(&name) {
                self.storage.delete(&name).await?;
                info!(store = %name, "Deleted stale cache store");
                deleted.push(name);
            }
        }

        self.active.store(true, Ordering::Release);

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.warm_manifest().await;
        });

        Ok(deleted)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &EdgeCacheConfig {
        &self.config
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Current primary store handle.
    pub async fn image_store(&self) -> Arc<dyn CacheStore> {
        self.images.read().await.clone()
    }

    /// Current manifest store handle.
    pub async fn manifest_store(&self) -> Arc<dyn CacheStore> {
        self.manifest.read().await.clone()
    }

    /// Record the latest network conditions.
    pub fn update_network(&self, info: NetworkInfo) {
        self.network.send_replace(info);
    }

    pub fn network(&self) -> NetworkInfo {
        *self.network.borrow()
    }

    /// Address an origin-relative path on the origin.
    ///
    /// Only `/path?query` is accepted. Absolute and scheme-relative
    /// references are rejected so a request can never leave the origin.
    pub fn request_url(&self, path_and_query: &str) -> Result<Url, FetchError> {
        if !path_and_query.starts_with('/')
            || path_and_query.starts_with("//")
            || path_and_query.starts_with("/\\")
        {
            return Err(FetchError::InvalidUrl(format!(
                "{}: not an origin-relative path",
                path_and_query
            )));
        }

        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        let mut url = self.origin.clone();
        url.set_path(path);
        url.set_query(query);
        url.set_fragment(None);
        Ok(url)
    }

    fn is_image_path(&self, path: &str) -> bool {
        path.starts_with(&self.config.image_path_prefix)
    }

    /// Offer a request to the cache.
    pub async fn intercept(self: &Arc<Self>, method: &Method, path_and_query: &str) -> Intercepted {
        if !self.is_active() || *method != Method::GET {
            return Intercepted::PassThrough;
        }

        let path = path_and_query
            .split_once('?')
            .map_or(path_and_query, |(path, _)| path);

        let is_image = self.is_image_path(path);
        let is_manifest = !is_image && path.ends_with(&self.config.manifest_suffix);
        if !is_image && !is_manifest {
            return Intercepted::PassThrough;
        }

        let url = match self.request_url(path_and_query) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Not intercepting unresolvable request");
                return Intercepted::PassThrough;
            }
        };

        let response = if is_image {
            self.handle_image_request(url).await
        } else {
            self.handle_manifest_request(url).await
        };
        Intercepted::Handled(response)
    }

    /// Serve an image from cache, or fetch, store and return it.
    pub async fn handle_image_request(self: &Arc<Self>, url: Url) -> EdgeResponse {
        let key = url.to_string();
        let store = self.image_store().await;

        if let Some(entry) = self.lookup(&store, &key).await {
            let now = Utc::now();
            if entry.age(now) > self.config.max_age {
                debug!(key = %key, "Stale image entry, refreshing in background");
                self.spawn_image_refresh(url);
            }
            if self.config.eviction_policy == EvictionPolicy::LeastRecentlyUsed {
                if let Err(e) = store.touch(&key, now).await {
                    warn!(key = %key, error = %e, "Failed to record cache hit");
                }
            }
            debug!(key = %key, "Image cache hit");
            return EdgeResponse::cached(entry);
        }

        debug!(key = %key, "Image cache miss");
        match self.fetch_with_timeout(&url).await {
            Ok(response) if response.status == StatusCode::OK => {
                self.store_image(&store, &key, &response).await;
                EdgeResponse::fetched(response)
            }
            Ok(response) => {
                warn!(key = %key, status = response.status.as_u16(), "Upstream rejected image, serving fallback");
                EdgeResponse::fallback()
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Image fetch failed, serving fallback");
                EdgeResponse::fallback()
            }
        }
    }

    /// Serve the manifest from cache, or fetch, store and return it.
    ///
    /// There is no safe substitute for a manifest: transport failures yield
    /// 503 and upstream errors are passed through.
    pub async fn handle_manifest_request(self: &Arc<Self>, url: Url) -> EdgeResponse {
        let key = url.to_string();
        let store = self.manifest_store().await;

        if let Some(entry) = self.lookup(&store, &key).await {
            if entry.age(Utc::now()) > self.config.manifest_ttl {
                debug!(key = %key, "Stale manifest, refreshing in background");
                self.spawn_manifest_refresh(url);
            }
            return EdgeResponse::cached(entry);
        }

        match self.upstream.fetch(&url).await {
            Ok(response) if response.status == StatusCode::OK => {
                self.store_entry(&store, &key, &response).await;
                EdgeResponse::fetched(response)
            }
            Ok(response) => {
                warn!(key = %key, status = response.status.as_u16(), "Manifest fetch rejected");
                EdgeResponse::status_only(response.status)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Manifest fetch failed");
                EdgeResponse::status_only(StatusCode::SERVICE_UNAVAILABLE)
            }
        }
    }

    /// Forward a request the cache does not handle.
    pub async fn forward(&self, request: UpstreamRequest) -> Result<UpstreamResponse, FetchError> {
        self.upstream.forward(request).await
    }

    /// Bring the image store back under its ceiling.
    ///
    /// Removes the configured fraction of entries (by count, oldest by the
    /// eviction policy first), then keeps removing while still over.
    pub async fn manage_cache_size(&self) -> Result<EvictionReport, StoreError> {
        let store = self.image_store().await;
        let mut entries = store.entries().await?;
        let bytes_before: u64 = entries.iter().map(|e| e.size).sum();

        let mut report = EvictionReport {
            entries_before: entries.len(),
            removed: 0,
            bytes_before,
            bytes_after: bytes_before,
        };
        if bytes_before <= self.config.max_size {
            return Ok(report);
        }

        match self.config.eviction_policy {
            EvictionPolicy::OldestFirst => entries.sort_by_key(|e| e.cached_at),
            EvictionPolicy::LeastRecentlyUsed => entries.sort_by_key(|e| e.last_accessed),
        }

        let quota = eviction_quota(entries.len(), self.config.eviction_fraction);
        for meta in &entries {
            if report.removed >= quota && report.bytes_after <= self.config.max_size {
                break;
            }
            store.delete(&meta.key).await?;
            report.removed += 1;
            report.bytes_after = report.bytes_after.saturating_sub(meta.size);
        }

        info!(
            removed = report.removed,
            bytes_before = report.bytes_before,
            bytes_after = report.bytes_after,
            "Evicted image cache entries"
        );
        Ok(report)
    }

    /// Warm the image store for later navigation.
    ///
    /// Low and auto priorities are skipped entirely on `slow-2g`/`2g` or with
    /// save-data on. URLs are fetched in concurrent batches; one failure never
    /// aborts its batch.
    pub async fn prefetch(self: &Arc<Self>, urls: &[String], priority: FetchPriority) -> PrefetchReport {
        let network = self.network();
        let mut report = PrefetchReport {
            requested: urls.len(),
            ..Default::default()
        };

        let constrained = network.effective_type.is_slowest() || network.save_data;
        if constrained && priority != FetchPriority::High {
            debug!(
                connection = %network.effective_type,
                save_data = network.save_data,
                count = urls.len(),
                "Skipping prefetch on constrained network"
            );
            report.skipped = urls.len();
            return report;
        }

        let fastest = network.effective_type.is_fastest();
        let batch_size = if fastest {
            self.config.fast_batch_size
        } else {
            self.config.slow_batch_size
        }
        .max(1);

        for (index, batch) in urls.chunks(batch_size).enumerate() {
            if index > 0 && !fastest {
                tokio::time::sleep(self.config.batch_pause).await;
            }
            let outcomes = join_all(batch.iter().map(|url| self.warm_image(url))).await;
            tally(&mut report, outcomes);
        }

        debug!(?report, "Prefetch complete");
        report
    }

    /// Fetch and store critical images concurrently, without batching.
    pub async fn preload_critical(self: &Arc<Self>, images: &[String]) -> PrefetchReport {
        let mut report = PrefetchReport {
            requested: images.len(),
            ..Default::default()
        };
        let outcomes = join_all(images.iter().map(|url| self.warm_image(url))).await;
        tally(&mut report, outcomes);

        debug!(?report, "Critical preload complete");
        report
    }

    /// Discard every image entry by recreating the store.
    pub async fn clear_cache(&self) -> Result<(), EdgeError> {
        let name = self.config.images_store_name();
        let mut images = self.images.write().await;
        self.storage.delete(&name).await?;
        *images = self.storage.open(&name).await?;

        info!(store = %name, "Image cache cleared");
        Ok(())
    }

    /// Entry count, total size and utilization of the image store.
    pub async fn get_stats(&self) -> Result<CacheStats, StoreError> {
        let entries = self.image_store().await.entries().await?;
        let total_size = entries.iter().map(|e| e.size).sum();
        Ok(CacheStats::new(entries.len(), total_size, self.config.max_size))
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Cached entry for `key`; entries with another version tag are deleted.
    async fn lookup(&self, store: &Arc<dyn CacheStore>, key: &str) -> Option<CacheEntry> {
        let entry = match store.get(key).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed");
                return None;
            }
        };

        if entry.version != self.config.version {
            debug!(key = %key, version = %entry.version, "Dropping entry from another cache version");
            if let Err(e) = store.delete(key).await {
                warn!(key = %key, error = %e, "Failed to delete stale-version entry");
            }
            return None;
        }
        Some(entry)
    }

    /// Race the fetch against the timeout. On timeout the spawned request is
    /// left to finish on its own and its result is dropped.
    async fn fetch_with_timeout(&self, url: &Url) -> Result<UpstreamResponse, FetchError> {
        let upstream = Arc::clone(&self.upstream);
        let target = url.clone();
        let request = tokio::spawn(async move { upstream.fetch(&target).await });

        match tokio::time::timeout(self.config.fetch_timeout, request).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(FetchError::Network(join_error.to_string())),
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
                after: self.config.fetch_timeout,
            }),
        }
    }

    async fn store_entry(&self, store: &Arc<dyn CacheStore>, key: &str, response: &UpstreamResponse) {
        let entry = CacheEntry::new(
            key,
            response.body.clone(),
            response.content_type().unwrap_or(DEFAULT_CONTENT_TYPE),
            self.config.version.clone(),
        );
        if let Err(e) = store.put(entry).await {
            warn!(key = %key, error = %e, "Failed to store cache entry");
        }
    }

    /// Store an image, then enforce the size ceiling. Sweep failures are
    /// logged and do not undo the write.
    async fn store_image(&self, store: &Arc<dyn CacheStore>, key: &str, response: &UpstreamResponse) {
        self.store_entry(store, key, response).await;
        if let Err(e) = self.manage_cache_size().await {
            warn!(error = %e, "Cache size management failed");
        }
    }

    /// Claim `key` for a background refresh. Returns false when one is
    /// already running.
    fn begin_refresh(&self, key: &str) -> bool {
        self.refreshing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string())
    }

    fn end_refresh(&self, key: &str) {
        self.refreshing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    fn spawn_image_refresh(self: &Arc<Self>, url: Url) {
        if !self.begin_refresh(url.as_str()) {
            debug!(url = %url, "Image refresh already in flight");
            return;
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            match manager.fetch_with_timeout(&url).await {
                Ok(response) if response.status == StatusCode::OK => {
                    let store = manager.image_store().await;
                    manager.store_image(&store, url.as_str(), &response).await;
                }
                Ok(response) => {
                    debug!(url = %url, status = response.status.as_u16(), "Background refresh rejected")
                }
                Err(e) => debug!(url = %url, error = %e, "Background refresh failed"),
            }
            manager.end_refresh(url.as_str());
        });
    }

    fn spawn_manifest_refresh(self: &Arc<Self>, url: Url) {
        if !self.begin_refresh(url.as_str()) {
            debug!(url = %url, "Manifest refresh already in flight");
            return;
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            match manager.upstream.fetch(&url).await {
                Ok(response) if response.status == StatusCode::OK => {
                    let store = manager.manifest_store().await;
                    manager.store_entry(&store, url.as_str(), &response).await;
                }
                Ok(response) => {
                    debug!(url = %url, status = response.status.as_u16(), "Manifest refresh rejected")
                }
                Err(e) => debug!(url = %url, error = %e, "Manifest refresh failed"),
            }
            manager.end_refresh(url.as_str());
        });
    }

    async fn warm_manifest(&self) {
        let url = match self.request_url(&self.config.manifest_path()) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Cannot build manifest URL");
                return;
            }
        };
        let store = self.manifest_store().await;
        if self.lookup(&store, url.as_str()).await.is_some() {
            return;
        }

        match self.upstream.fetch(&url).await {
            Ok(response) if response.status == StatusCode::OK => {
                self.store_entry(&store, url.as_str(), &response).await;
                debug!(url = %url, "Manifest warmed");
            }
            Ok(response) => {
                debug!(url = %url, status = response.status.as_u16(), "Manifest not available for warming")
            }
            Err(e) => debug!(url = %url, error = %e, "Manifest warm fetch failed"),
        }
    }

    async fn warm_image(&self, raw_url: &str) -> Warmed {
        let url = match self.request_url(raw_url) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Skipping unresolvable prefetch URL");
                return Warmed::Failed;
            }
        };
        if !self.is_image_path(url.path()) {
            warn!(url = %url, "Skipping prefetch URL outside the image path");
            return Warmed::Failed;
        }
        let key = url.to_string();
        let store = self.image_store().await;

        if self.lookup(&store, &key).await.is_some() {
            return Warmed::AlreadyCached;
        }

        match self.fetch_with_timeout(&url).await {
            Ok(response) if response.status == StatusCode::OK => {
                self.store_image(&store, &key, &response).await;
                Warmed::Fetched
            }
            Ok(response) => {
                debug!(key = %key, status = response.status.as_u16(), "Prefetch rejected");
                Warmed::Failed
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Prefetch failed");
                Warmed::Failed
            }
        }
    }
}

fn eviction_quota(len: usize, fraction: f64) -> usize {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    ((len as f64 * fraction).ceil() as usize).min(len)
}

fn tally(report: &mut PrefetchReport, outcomes: Vec<Warmed>) {
    for outcome in outcomes {
        match outcome {
            Warmed::Fetched => report.fetched += 1,
            Warmed::AlreadyCached => report.already_cached += 1,
            Warmed::Failed => report.failed += 1,
        }
    }
}

fn insert_header(headers: &mut HeaderMap, name: http::header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

// =============================================================================
// Tests
// =============================================================================
