//! HTTP front of the edge cache.
//!
//! Every request not addressed to `/__edge/*` is offered to the
//! [`EdgeCacheManager`]. Requests it does not intercept are forwarded to the
//! origin unmodified.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{rejection::JsonRejection, Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::debug;

use crate::edge::{
    ControlMessage, ControlReply, EdgeCacheManager, EdgeHandle, EdgeResponse, Intercepted,
    NetworkInfo, UpstreamRequest,
};
use crate::error::{EdgeError, FetchError, StoreError};

use super::handlers::ErrorResponse;

/// Largest request body forwarded to the origin.
pub const MAX_FORWARD_BODY: usize = 16 * 1024 * 1024;

/// State shared by the edge handlers.
#[derive(Clone)]
pub struct EdgeState {
    pub manager: Arc<EdgeCacheManager>,
    pub control: EdgeHandle,
}

impl EdgeState {
    pub fn new(manager: Arc<EdgeCacheManager>, control: EdgeHandle) -> Self {
        Self { manager, control }
    }
}

/// Edge status response.
#[derive(Debug, Serialize)]
pub struct EdgeHealthResponse {
    pub status: String,
    pub version: String,
    pub active: bool,
    pub network: NetworkInfo,
}

// =============================================================================
// Error Mapping
// =============================================================================

impl IntoResponse for EdgeError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            EdgeError::Store(StoreError::Io(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "store_io_error"),
            EdgeError::Store(StoreError::Metadata(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "store_metadata_error")
            }
            EdgeError::Fetch(FetchError::Timeout { .. }) => (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout"),
            EdgeError::Fetch(FetchError::InvalidUrl(_)) => (StatusCode::BAD_REQUEST, "invalid_url"),
            EdgeError::Fetch(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            EdgeError::ChannelClosed => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
        };

        ErrorResponse::respond(status, error_type, self.to_string())
    }
}

impl IntoResponse for EdgeResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle `POST /__edge/control`.
///
/// # Request
///
/// ```json
/// {"type": "GET_CACHE_STATS"}
/// ```
///
/// # Response
///
/// `200 OK` with the reply for the message, e.g.
/// ```json
/// {"imageCount": 0, "totalSize": 0, "maxSize": 104857600, "utilization": "0.00%"}
/// ```
pub async fn control_handler(
    State(state): State<EdgeState>,
    message: Result<Json<ControlMessage>, JsonRejection>,
) -> Result<Json<ControlReply>, Response> {
    let Json(message) = message.map_err(|rejection| {
        ErrorResponse::respond(
            StatusCode::BAD_REQUEST,
            "invalid_control_message",
            rejection.body_text(),
        )
    })?;

    debug!(?message, "Control message received");
    state
        .control
        .dispatch(message)
        .await
        .map(Json)
        .map_err(IntoResponse::into_response)
}

/// Handle `GET /__edge/health`.
pub async fn edge_health_handler(State(state): State<EdgeState>) -> Json<EdgeHealthResponse> {
    Json(EdgeHealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active: state.manager.is_active(),
        network: state.manager.network(),
    })
}

/// Proxy every other request.
///
/// Client-hint headers (`ECT`, `Downlink`, `Save-Data`) update the
/// manager's network view before the request is considered.
pub async fn proxy_handler(State(state): State<EdgeState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    if let Some(network) = NetworkInfo::from_headers(&parts.headers) {
        state.manager.update_network(network);
    }

    match state.manager.intercept(&parts.method, &path_and_query).await {
        Intercepted::Handled(response) => response.into_response(),
        Intercepted::PassThrough => {
            match forward(&state.manager, parts.method, &path_and_query, parts.headers, body).await {
                Ok(response) => response,
                Err(e) => e.into_response(),
            }
        }
    }
}

async fn forward(
    manager: &EdgeCacheManager,
    method: http::Method,
    path_and_query: &str,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, EdgeError> {
    let url = manager.request_url(path_and_query)?;
    let body = to_bytes(body, MAX_FORWARD_BODY)
        .await
        .map_err(|e| FetchError::Network(format!("request body: {}", e)))?;

    debug!(%method, url = %url, "Forwarding request");
    let response = manager
        .forward(UpstreamRequest {
            method,
            url,
            headers,
            body,
        })
        .await?;

    Ok((response.status, response.headers, response.body).into_response())
}
