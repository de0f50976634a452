//! Test utilities for integration tests.
//!
//! This module provides an in-memory origin for the edge proxy and helpers
//! for building asset directories, routers and requests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::HeaderMap;
use http_body_util::BodyExt;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};
use tempfile::TempDir;
use url::Url;

use image_edge::edge::{
    spawn_control_loop, CacheStorage, EdgeCacheConfig, EdgeCacheManager, MemoryCacheStorage,
    Upstream, UpstreamRequest, UpstreamResponse,
};
use image_edge::error::FetchError;
use image_edge::server::{create_edge_router, create_router, EdgeState, RouterConfig};
use image_edge::transcode::TranscodeService;

// =============================================================================
// Source Images
// =============================================================================

/// Encode a gradient PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8])
    });
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
        .unwrap();
    buf
}

pub fn write_png(dir: &Path, name: &str, width: u32, height: u32) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, png_bytes(width, height)).unwrap();
}

/// Asset root with `a.png` (64x48), `photos/b.png` (32x32) and a
/// non-image `notes.txt`.
pub fn asset_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_png(dir.path(), "a.png", 64, 48);
    write_png(dir.path(), "photos/b.png", 32, 32);
    std::fs::write(dir.path().join("notes.txt"), b"not an image").unwrap();
    dir
}

pub fn transcode_router(dir: &TempDir) -> Router {
    create_router(
        TranscodeService::new(dir.path()),
        RouterConfig::new().with_tracing(false),
    )
}

pub fn is_webp(data: &[u8]) -> bool {
    data.len() > 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP"
}

pub fn is_avif(data: &[u8]) -> bool {
    data.len() > 12 && &data[4..8] == b"ftyp" && &data[8..12] == b"avif"
}

pub fn is_jpeg(data: &[u8]) -> bool {
    data.len() > 4 && data[0] == 0xFF && data[1] == 0xD8
}

// =============================================================================
// Mock Origin
// =============================================================================

struct Route {
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
}

/// An origin answering from a fixed path → response table.
///
/// Paths are matched including the query string. Unknown paths fail with a
/// network error, like an unreachable origin.
pub struct MockUpstream {
    routes: HashMap<String, Route>,
    image_prefix: String,
    image_calls: AtomicUsize,
    methods: Mutex<Vec<String>>,
    delay: Duration,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            image_prefix: "/transcode".to_string(),
            image_calls: AtomicUsize::new(0),
            methods: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_image(self, path: &str, body: impl Into<Bytes>) -> Self {
        self.with_route(path, StatusCode::OK, "image/webp", body)
    }

    pub fn with_route(
        mut self,
        path: &str,
        status: StatusCode,
        content_type: &'static str,
        body: impl Into<Bytes>,
    ) -> Self {
        self.routes.insert(
            path.to_string(),
            Route {
                status,
                content_type,
                body: body.into(),
            },
        );
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Requests seen for image paths.
    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }

    /// Methods of every request seen, in order.
    pub fn methods(&self) -> Vec<String> {
        self.methods.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn forward(&self, request: UpstreamRequest) -> Result<UpstreamResponse, FetchError> {
        let path = match request.url.query() {
            Some(query) => format!("{}?{}", request.url.path(), query),
            None => request.url.path().to_string(),
        };

        self.methods.lock().unwrap().push(request.method.to_string());
        if path.starts_with(&self.image_prefix) {
            self.image_calls.fetch_add(1, Ordering::SeqCst);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let route = self
            .routes
            .get(&path)
            .ok_or_else(|| FetchError::Network(format!("connection refused: {}", path)))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(route.content_type));
        Ok(UpstreamResponse {
            status: route.status,
            headers,
            body: route.body.clone(),
        })
    }
}

// =============================================================================
// Edge Setup
// =============================================================================

pub struct TestEdge {
    pub router: Router,
    pub manager: Arc<EdgeCacheManager>,
}

pub fn origin() -> Url {
    Url::parse("http://origin.test/").unwrap()
}

pub async fn edge_with_storage(
    config: EdgeCacheConfig,
    upstream: Arc<MockUpstream>,
    storage: Arc<dyn CacheStorage>,
) -> TestEdge {
    let manager = EdgeCacheManager::install(config, origin(), storage, upstream)
        .await
        .unwrap();
    manager.activate().await.unwrap();

    let (control, _task) = spawn_control_loop(manager.clone());
    let router = create_edge_router(EdgeState::new(manager.clone(), control), false);
    TestEdge { router, manager }
}

pub async fn edge(config: EdgeCacheConfig, upstream: Arc<MockUpstream>) -> TestEdge {
    edge_with_storage(config, upstream, Arc::new(MemoryCacheStorage::new())).await
}

// =============================================================================
// Requests
// =============================================================================

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}
