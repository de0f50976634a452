//! Transcode Service.
//!
//! The TranscodeService is the entry point for transcode requests. It
//! orchestrates:
//! - Source resolution against the asset root
//! - Server-side adaptive quality
//! - Decode, resize and encode on the blocking pool
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      TranscodeService                        │
//! │  1. Resolve source path     3. Compute adaptive quality      │
//! │  2. Read source bytes       4. Resize + encode (blocking)    │
//! │           │                              │                   │
//! │           ▼                              ▼                   │
//! │    ┌─────────────┐              ┌──────────────────┐         │
//! │    │ asset root  │              │  ImageTranscoder │         │
//! │    └─────────────┘              └──────────────────┘         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The service holds no mutable state, so requests run fully in parallel.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::TranscodeError;
use crate::format::ImageFormat;

use super::encoder::ImageTranscoder;
use super::quality::ServerHints;
use super::request::TranscodeRequest;

/// Result of a successful transcode.
#[derive(Debug, Clone)]
pub struct TranscodeResponse {
    /// Encoded image bytes
    pub data: Bytes,

    /// Format of `data`
    pub format: ImageFormat,

    /// Format the client asked for
    pub requested_format: ImageFormat,

    /// `round(width * dpr)`
    pub adaptive_width: u32,

    /// Quality after server-side correction
    pub quality: u8,

    /// Whether save-data applied (header or query flag)
    pub save_data: bool,

    /// Strong validator for the encoded bytes
    pub etag: String,
}

impl TranscodeResponse {
    /// Whether the delivered format differs from the requested one.
    pub fn substituted(&self) -> bool {
        self.format != self.requested_format
    }
}

/// Stateless service producing re-encoded images from an asset directory.
#[derive(Debug, Clone)]
pub struct TranscodeService {
    asset_root: PathBuf,
    transcoder: ImageTranscoder,
}

impl TranscodeService {
    /// Create a service reading sources below `asset_root`.
    pub fn new(asset_root: impl Into<PathBuf>) -> Self {
        Self {
            asset_root: asset_root.into(),
            transcoder: ImageTranscoder::new(),
        }
    }

    /// Directory sources are resolved against.
    pub fn asset_root(&self) -> &Path {
        &self.asset_root
    }

    /// Transcode one validated request.
    ///
    /// # Errors
    ///
    /// - [`TranscodeError::InvalidSource`] for paths escaping the asset root
    /// - [`TranscodeError::SourceNotFound`] when the source cannot be read
    /// - decode/encode errors from the transcoder
    pub async fn transcode(
        &self,
        request: &TranscodeRequest,
        hints: &ServerHints,
    ) -> Result<TranscodeResponse, TranscodeError> {
        let path = self.resolve_source(&request.source)?;

        let source = tokio::fs::read(&path).await.map_err(|e| {
            debug!(path = %path.display(), error = %e, "source unreadable");
            TranscodeError::SourceNotFound {
                path: request.source.clone(),
            }
        })?;

        let adaptive_width = request.adaptive_width();
        let quality = hints.adaptive_quality(request.quality, request.save_data, request.dpr);
        let format = request.format;

        debug!(
            source = %request.source,
            adaptive_width,
            requested_quality = request.quality,
            quality,
            format = %format,
            "transcoding"
        );

        let transcoder = self.transcoder.clone();
        let output = tokio::task::spawn_blocking(move || {
            transcoder.transcode(&source, adaptive_width, quality, format)
        })
        .await
        .map_err(|e| TranscodeError::Internal {
            message: e.to_string(),
        })??;

        let etag = etag_for(&output.data);

        Ok(TranscodeResponse {
            data: output.data,
            format: output.format,
            requested_format: output.requested,
            adaptive_width,
            quality,
            save_data: hints.save_data || request.save_data,
            etag,
        })
    }

    /// Map a source reference onto a file below the asset root.
    ///
    /// Only normal path components are allowed; `..` and prefixes are
    /// rejected so a reference can never leave the root.
    pub fn resolve_source(&self, source: &str) -> Result<PathBuf, TranscodeError> {
        let relative = Path::new(source.trim_start_matches('/'));
        let mut resolved = self.asset_root.clone();

        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(TranscodeError::InvalidSource {
                        path: source.to_string(),
                    })
                }
            }
        }

        if resolved == self.asset_root {
            return Err(TranscodeError::InvalidSource {
                path: source.to_string(),
            });
        }

        Ok(resolved)
    }
}

/// Quoted ETag derived from the first 16 bytes of the SHA-256 digest.
fn etag_for(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("\"{}\"", hex::encode(&digest[..16]))
}

// =============================================================================
// Tests
// =============================================================================
