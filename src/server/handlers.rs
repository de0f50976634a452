//! HTTP request handlers for the transcode API.
//!
//! # Endpoints
//!
//! - `GET|HEAD /transcode?url=...&w=...&q=...&f=...&dpr=...&save-data=1` - Transcode an image
//! - `OPTIONS /transcode` - Allowed methods
//! - `GET /health` - Health check endpoint

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::TranscodeError;
use crate::transcode::{
    ServerHints, TranscodeQuery, TranscodeRequest, TranscodeResponse, TranscodeService,
};

/// `Cache-Control` for transcoded images. Output is a pure function of the URL.
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Request headers the response depends on.
pub const VARY_HEADERS: &str = "Accept, DPR, Viewport-Width, Width, Save-Data";

/// Served images are inert; nothing may load or execute from them.
pub const IMAGE_CSP: &str = "default-src 'none'; style-src 'unsafe-inline'; sandbox";

/// Methods supported on the transcode endpoint.
pub const ALLOWED_METHODS: &str = "GET, HEAD, OPTIONS";

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the transcode service.
#[derive(Clone)]
pub struct AppState {
    /// The transcode service
    pub transcode_service: Arc<TranscodeService>,

    /// `max-age` for `OPTIONS` responses, in seconds
    pub preflight_max_age: u32,
}

impl AppState {
    pub fn new(transcode_service: TranscodeService) -> Self {
        Self {
            transcode_service: Arc::new(transcode_service),
            preflight_max_age: 86400,
        }
    }

    pub fn with_preflight_max_age(mut self, seconds: u32) -> Self {
        self.preflight_max_age = seconds;
        self
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_width")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }

    /// Log by severity and render as a JSON response.
    pub(crate) fn respond(status: StatusCode, error_type: &str, message: String) -> Response {
        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else if status.is_client_error() {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let body = ErrorResponse::with_status(error_type, message, status);
        (status, Json(body)).into_response()
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Validation problems are 400, unreadable sources 404, and everything
/// during decode/resize/encode 500 with no partial body.
impl IntoResponse for TranscodeError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            TranscodeError::MissingSource => (StatusCode::BAD_REQUEST, "missing_source"),
            TranscodeError::InvalidWidth { .. } => (StatusCode::BAD_REQUEST, "invalid_width"),
            TranscodeError::InvalidQuality { .. } => (StatusCode::BAD_REQUEST, "invalid_quality"),
            TranscodeError::InvalidDpr { .. } => (StatusCode::BAD_REQUEST, "invalid_dpr"),
            TranscodeError::InvalidParameter { .. } => {
                (StatusCode::BAD_REQUEST, "invalid_parameter")
            }
            TranscodeError::InvalidSource { .. } => (StatusCode::BAD_REQUEST, "invalid_source"),
            TranscodeError::SourceNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            TranscodeError::DecodeError { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "decode_error")
            }
            TranscodeError::EncodeError { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "encode_error")
            }
            TranscodeError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        ErrorResponse::respond(status, error_type, self.to_string())
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle transcode requests.
///
/// # Endpoint
///
/// `GET /transcode` (and `HEAD`, which axum answers with the same headers
/// and no body)
///
/// # Query Parameters
///
/// - `url`: source image path below the asset root (required)
/// - `w`: width in CSS pixels, 1-3840 (default: 800)
/// - `q`: quality, 1-100 (default: 85)
/// - `f`: `avif`, `webp`, `jpg`/`jpeg` or `jxl` (default: `webp`)
/// - `dpr`: device pixel ratio, (0, 5] (default: 1)
/// - `save-data`: `1` to request reduced quality
///
/// # Response
///
/// - `200 OK`: encoded image
/// - `304 Not Modified`: `If-None-Match` matched the ETag
/// - `400 Bad Request`: invalid or missing parameters
/// - `404 Not Found`: source image not readable
/// - `500 Internal Server Error`: decode or encode failure
///
/// # Headers
///
/// - `Content-Type`, `Content-Length`, `ETag`
/// - `Cache-Control: public, max-age=31536000, immutable`
/// - `Vary: Accept, DPR, Viewport-Width, Width, Save-Data`
/// - `X-Content-Type-Options: nosniff`, `Content-Security-Policy`
/// - `X-Image-Width`, `X-Image-Quality`, `X-Image-Format`
/// - `Save-Data: on` when save-data applied
/// - `X-Format-Substituted: jxl->webp` when the requested format was replaced
pub async fn transcode_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<TranscodeQuery>, QueryRejection>,
) -> Result<Response, TranscodeError> {
    let Query(query) = query.map_err(|rejection| TranscodeError::InvalidParameter {
        message: rejection.body_text(),
    })?;

    let request = TranscodeRequest::from_query(query)?;
    let hints = ServerHints::from_headers(&headers);

    let response = state.transcode_service.transcode(&request, &hints).await?;

    let mut response_headers = cache_headers(&response)?;

    if if_none_match(&headers, &response.etag) {
        debug!(source = %request.source, etag = %response.etag, "Not modified");
        return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
    }

    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(response.format.content_type()),
    );
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(response.data.len()));
    response_headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response_headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(IMAGE_CSP),
    );
    response_headers.insert("x-image-width", HeaderValue::from(response.adaptive_width));
    response_headers.insert("x-image-quality", HeaderValue::from(u16::from(response.quality)));
    response_headers.insert(
        "x-image-format",
        HeaderValue::from_static(response.format.as_str()),
    );
    if response.save_data {
        response_headers.insert("save-data", HeaderValue::from_static("on"));
    }
    if response.substituted() {
        let substitution = format!("{}->{}", response.requested_format, response.format);
        if let Ok(value) = HeaderValue::from_str(&substitution) {
            response_headers.insert("x-format-substituted", value);
        }
    }

    Ok((StatusCode::OK, response_headers, response.data).into_response())
}

/// Headers shared by 200 and 304 responses.
fn cache_headers(response: &TranscodeResponse) -> Result<HeaderMap, TranscodeError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(IMMUTABLE_CACHE_CONTROL),
    );
    headers.insert(header::VARY, HeaderValue::from_static(VARY_HEADERS));
    let etag = HeaderValue::from_str(&response.etag).map_err(|e| TranscodeError::Internal {
        message: format!("invalid ETag: {}", e),
    })?;
    headers.insert(header::ETAG, etag);
    Ok(headers)
}

/// Whether `If-None-Match` lists `etag` (or `*`).
fn if_none_match(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|candidate| candidate.trim().trim_start_matches("W/"))
        .any(|candidate| candidate == "*" || candidate == etag)
}

/// Complete `OPTIONS` responses of the transcode route with `Allow` and a
/// short-lived `Cache-Control`.
///
/// The CORS layer answers every `OPTIONS` request on its own, so this wraps
/// that route's CORS layer and rewrites the result to `204 No Content`.
pub async fn options_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let is_options = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if !is_options {
        return response;
    }

    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={}", state.preflight_max_age)) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    response
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
