//! Origin access for the edge cache.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use crate::error::FetchError;

/// A request forwarded to the origin.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamRequest {
    /// A bare GET for `url`.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// A fully buffered origin response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    /// `Content-Type` header, if present and valid UTF-8.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Something that can answer HTTP requests on behalf of the origin.
///
/// Non-success statuses are returned as responses, not errors; only
/// transport failures produce [`FetchError`].
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Forward an arbitrary request.
    async fn forward(&self, request: UpstreamRequest) -> Result<UpstreamResponse, FetchError>;

    /// GET `url`.
    async fn fetch(&self, url: &Url) -> Result<UpstreamResponse, FetchError> {
        self.forward(UpstreamRequest::get(url.clone())).await
    }
}

/// [`Upstream`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn forward(&self, request: UpstreamRequest) -> Result<UpstreamResponse, FetchError> {
        let url = request.url.to_string();

        let mut headers = request.headers;
        for name in [HOST, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING] {
            headers.remove(name);
        }

        let response = self
            .client
            .request(request.method, request.url)
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| FetchError::Network(format!("{}: {}", url, e)))?;

        let status = response.status();
        let mut headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(format!("{}: {}", url, e)))?;

        // The body is buffered; length and framing are recomputed downstream.
        headers.remove(TRANSFER_ENCODING);
        headers.remove(CONTENT_LENGTH);

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
