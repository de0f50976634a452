use std::time::Duration;

use thiserror::Error;

/// Errors produced while validating, reading, or re-encoding a source image.
#[derive(Debug, Clone, Error)]
pub enum TranscodeError {
    /// The `url` query parameter was absent or empty
    #[error("Missing source image reference")]
    MissingSource,

    /// Requested width outside 1..=3840
    #[error("Invalid width: {width} (must be 1-{max})")]
    InvalidWidth { width: u32, max: u32 },

    /// Requested quality outside 1..=100
    #[error("Invalid quality: {quality} (must be 1-100)")]
    InvalidQuality { quality: u32 },

    /// Device pixel ratio not finite or outside (0, 5]
    #[error("Invalid device pixel ratio: {dpr}")]
    InvalidDpr { dpr: f32 },

    /// Query string could not be parsed
    #[error("Invalid request parameter: {message}")]
    InvalidParameter { message: String },

    /// Source path tries to escape the asset root
    #[error("Invalid source path: {path}")]
    InvalidSource { path: String },

    /// Source image could not be read
    #[error("Source image not found: {path}")]
    SourceNotFound { path: String },

    /// Source bytes are not a decodable image
    #[error("Failed to decode image: {message}")]
    DecodeError { message: String },

    /// Encoder rejected the image
    #[error("Failed to encode image: {message}")]
    EncodeError { message: String },

    /// The blocking transcode task died
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors from fetching through the edge upstream.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The fetch did not complete within the configured timeout
    #[error("Fetch of {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    /// Upstream answered with a non-success status
    #[error("Upstream returned {status} for {url}")]
    Status { url: String, status: u16 },

    /// Connection, TLS, or protocol failure
    #[error("Network error: {0}")]
    Network(String),

    /// The request URL could not be built
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Errors from the edge cache stores.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Filesystem failure in a disk-backed store
    #[error("Store I/O error: {0}")]
    Io(String),

    /// Entry metadata could not be (de)serialized
    #[error("Store metadata error: {0}")]
    Metadata(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Metadata(err.to_string())
    }
}

/// Errors surfaced by the edge cache manager and its control channel.
#[derive(Debug, Clone, Error)]
pub enum EdgeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The control loop has shut down
    #[error("Edge control channel closed")]
    ChannelClosed,
}
