//! Edge Cache Manager.
//!
//! A long-lived caching proxy placed in front of the transcoding service.
//! Image requests (by path prefix) and the image manifest (by file name) are
//! answered from named, versioned stores; everything else is forwarded
//! untouched.
//!
//! # Components
//!
//! - [`EdgeCacheManager`]: lifecycle, interception, eviction, prefetch
//! - [`CacheStorage`] / [`CacheStore`]: named stores, in memory or on disk
//! - [`Upstream`]: origin access (`reqwest` in production)
//! - [`EdgeHandle`]: typed control channel (prefetch, preload, clear, stats)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use image_edge::edge::{
//!     spawn_control_loop, EdgeCacheConfig, EdgeCacheManager, HttpUpstream, MemoryCacheStorage,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = EdgeCacheManager::install(
//!     EdgeCacheConfig::default(),
//!     url::Url::parse("http://127.0.0.1:3000/")?,
//!     Arc::new(MemoryCacheStorage::new()),
//!     Arc::new(HttpUpstream::new()?),
//! )
//! .await?;
//! manager.activate().await?;
//!
//! let (handle, _task) = spawn_control_loop(manager);
//! println!("{:?}", handle.stats().await?);
//! # Ok(())
//! # }
//! ```

mod control;
mod disk;
mod entry;
mod manager;
mod network;
mod store;
mod upstream;

pub use control::{
    run_control_loop, spawn_control_loop, ControlMessage, ControlReply, EdgeCommand, EdgeHandle,
    CONTROL_CHANNEL_CAPACITY,
};
pub use disk::{DiskCacheStorage, DiskStore};
pub use entry::{CacheEntry, EntryMeta};
pub use manager::{
    CacheStats, CacheStatus, EdgeCacheConfig, EdgeCacheManager, EdgeResponse, EvictionPolicy,
    EvictionReport, Intercepted, PrefetchReport, EDGE_CACHE_HEADER, FALLBACK_CONTENT_TYPE,
    FALLBACK_HEADER, FALLBACK_IMAGE,
};
pub use network::NetworkInfo;
pub use store::{CacheStorage, CacheStore, MemoryCacheStorage, MemoryStore};
pub use upstream::{HttpUpstream, Upstream, UpstreamRequest, UpstreamResponse};
