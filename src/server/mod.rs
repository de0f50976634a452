//! HTTP server layer.
//!
//! Two routers share this module: the transcode server and the edge proxy
//! that caches in front of it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────────┐  ┌─────────────────────┐  │
//! │  │  handlers   │  │      edge       │  │       routes        │  │
//! │  │ (transcode) │  │ (proxy/control) │  │  (router config)    │  │
//! │  └─────────────┘  └─────────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod edge;
pub mod handlers;
pub mod routes;

pub use edge::{
    control_handler, edge_health_handler, proxy_handler, EdgeHealthResponse, EdgeState,
    MAX_FORWARD_BODY,
};
pub use handlers::{
    health_handler, options_middleware, transcode_handler, AppState, ErrorResponse, HealthResponse,
    ALLOWED_METHODS, IMAGE_CSP, IMMUTABLE_CACHE_CONTROL, VARY_HEADERS,
};
pub use routes::{create_edge_router, create_router, RouterConfig, EDGE_ROUTE_PREFIX};
