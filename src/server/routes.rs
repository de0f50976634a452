//! Router configuration.
//!
//! # Route Structure
//!
//! Transcode server:
//!
//! ```text
//! /health                     - Health check
//! /transcode                  - GET | HEAD | OPTIONS
//! ```
//!
//! Edge proxy (see [`super::edge`]):
//!
//! ```text
//! /__edge/health              - Edge status
//! /__edge/control             - POST control messages
//! everything else             - intercepted or forwarded to the origin
//! ```
//!
//! # Example
//!
//! ```ignore
//! use image_edge::server::routes::{create_router, RouterConfig};
//! use image_edge::transcode::TranscodeService;
//!
//! let service = TranscodeService::new("./public");
//! let config = RouterConfig::new()
//!     .with_cors_origins(vec!["https://example.com".to_string()]);
//!
//! let router = create_router(service, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use http::header::{CONTENT_TYPE, IF_NONE_MATCH};
use http::{HeaderName, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::edge::{control_handler, edge_health_handler, proxy_handler, EdgeState};
use super::handlers::{health_handler, options_middleware, transcode_handler, AppState};
use crate::hints::DEFAULT_ENDPOINT;
use crate::transcode::TranscodeService;

/// Path prefix reserved for the edge's own endpoints.
pub const EDGE_ROUTE_PREFIX: &str = "/__edge";

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP routers.
#[derive(Clone)]
pub struct RouterConfig {
    /// Path of the transcode endpoint
    pub endpoint: String,

    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// `max-age` for OPTIONS and CORS preflight responses, in seconds
    pub preflight_max_age: u32,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    /// Create a router configuration.
    ///
    /// By default:
    /// - The endpoint is `/transcode`
    /// - CORS allows any origin
    /// - Preflight max-age is 24 hours
    /// - Tracing is enabled
    pub fn new() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            cors_origins: None,
            preflight_max_age: 86400,
            enable_tracing: true,
        }
    }

    /// Serve the transcode endpoint at another path.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    pub fn with_preflight_max_age(mut self, seconds: u32) -> Self {
        self.preflight_max_age = seconds;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builders
// =============================================================================

/// Create the transcode server router.
///
/// `GET` routes answer `HEAD` automatically with the body stripped.
/// `OPTIONS` is answered by the CORS layer; on the transcode route it is
/// completed by [`options_middleware`]. Layers are applied per route so the
/// middleware wraps the CORS layer of that route only.
pub fn create_router(service: TranscodeService, config: RouterConfig) -> Router {
    let app_state = AppState::new(service).with_preflight_max_age(config.preflight_max_age);
    let cors = build_cors_layer(&config);

    let transcode = get(transcode_handler)
        .layer::<_, Infallible>(cors.clone())
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            options_middleware,
        ));

    let router = Router::new()
        .route("/health", get(health_handler).layer(cors))
        .route(&config.endpoint, transcode)
        .with_state(app_state);

    with_tracing(router, config.enable_tracing)
}

/// Create the edge proxy router.
///
/// The control and health routes live under [`EDGE_ROUTE_PREFIX`]; every
/// other request goes to the proxy fallback.
pub fn create_edge_router(state: EdgeState, enable_tracing: bool) -> Router {
    let router = Router::new()
        .route(
            &format!("{}/health", EDGE_ROUTE_PREFIX),
            get(edge_health_handler),
        )
        .route(
            &format!("{}/control", EDGE_ROUTE_PREFIX),
            post(control_handler),
        )
        .fallback(proxy_handler)
        .with_state(state);

    with_tracing(router, enable_tracing)
}

fn with_tracing(router: Router, enabled: bool) -> Router {
    if enabled {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let hint_headers = ["dpr", "viewport-width", "width", "save-data"].map(HeaderName::from_static);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers(
            [CONTENT_TYPE, IF_NONE_MATCH]
                .into_iter()
                .chain(hint_headers)
                .collect::<Vec<_>>(),
        )
        .max_age(Duration::from_secs(config.preflight_max_age as u64));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
