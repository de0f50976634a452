//! # image-edge
//!
//! Adaptive image delivery: a transcoding service, a caching edge proxy in
//! front of it, and a client-side resolver that picks the transcode URL for
//! the device and network at hand.
//!
//! ## Features
//!
//! - **Adaptive quality**: Save-Data, connection class, viewport and DPR lower quality where it is not visible
//! - **Format negotiation**: AVIF, WebP and progressive JPEG output
//! - **Edge caching**: Versioned stores with size-bounded eviction and offline fallback
//! - **Control channel**: Prefetch, preload, clear and stats requests to a running edge
//!
//! ## Architecture
//!
//! - [`hints`] - Client hint resolver (URLs, srcsets, preload hints)
//! - [`transcode`] - Request validation, quality policy and encoding
//! - [`edge`] - Edge cache manager, stores and control loop
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use image_edge::{create_router, RouterConfig, TranscodeService};
//!
//! #[tokio::main]
//! async fn main() {
//!     let router = create_router(TranscodeService::new("./public"), RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod config;
pub mod edge;
pub mod error;
pub mod format;
pub mod hints;
pub mod server;
pub mod transcode;

// Re-export commonly used types
pub use config::{Cli, Command, EdgeConfig, ResolveConfig, ServeConfig};
pub use edge::{
    spawn_control_loop, CacheStats, CacheStorage, CacheStore, ControlMessage, ControlReply,
    DiskCacheStorage, EdgeCacheConfig, EdgeCacheManager, EdgeHandle, EvictionPolicy, HttpUpstream,
    MemoryCacheStorage, NetworkInfo, PrefetchReport, Upstream,
};
pub use error::{EdgeError, FetchError, StoreError, TranscodeError};
pub use format::ImageFormat;
pub use hints::{
    adjust_quality, negotiate_format, AcceptHeaderProbe, AssumeWebp, ClientHintResolver,
    ClientHints, ConnectionClass, FetchPriority, FormatCapabilityProbe, PreloadHint,
};
pub use server::{
    create_edge_router, create_router, AppState, EdgeState, ErrorResponse, RouterConfig,
};
pub use transcode::{
    ImageTranscoder, ServerHints, TranscodeRequest, TranscodeResponse, TranscodeService,
};
