//! Transcode request descriptor and query-string parsing.
//!
//! A [`TranscodeRequest`] is built on the client side by the hint resolver,
//! serialized into the transcode URL, and parsed back by the service.

use serde::Deserialize;

use crate::error::TranscodeError;
use crate::format::ImageFormat;

/// Smallest width the transcoder accepts.
pub const MIN_WIDTH: u32 = 1;

/// Largest width the transcoder accepts.
pub const MAX_WIDTH: u32 = 3840;

/// Width used when `w` is omitted.
pub const DEFAULT_WIDTH: u32 = 800;

/// Quality used when `q` is omitted.
pub const DEFAULT_QUALITY: u8 = 85;

/// Format used when `f` is omitted.
pub const DEFAULT_FORMAT: ImageFormat = ImageFormat::Webp;

/// Largest device pixel ratio accepted.
pub const MAX_DPR: f32 = 5.0;

// =============================================================================
// Query Parameters
// =============================================================================

/// Raw query parameters of the transcode endpoint.
///
/// Numbers are kept wide so out-of-range values reach validation instead of
/// failing deserialization.
#[derive(Debug, Deserialize)]
pub struct TranscodeQuery {
    /// Path of the source image below the asset root
    #[serde(default)]
    pub url: Option<String>,

    /// Target width in CSS pixels
    #[serde(default = "default_width")]
    pub w: u32,

    /// Requested quality (1-100)
    #[serde(default = "default_quality")]
    pub q: u32,

    /// Requested format token
    #[serde(default = "default_format")]
    pub f: String,

    /// Device pixel ratio
    #[serde(default)]
    pub dpr: Option<f32>,

    /// `"1"` when the client asked to save data
    #[serde(default, rename = "save-data")]
    pub save_data: Option<String>,
}

fn default_width() -> u32 {
    DEFAULT_WIDTH
}

fn default_quality() -> u32 {
    DEFAULT_QUALITY as u32
}

fn default_format() -> String {
    DEFAULT_FORMAT.as_str().to_string()
}

// =============================================================================
// Transcode Request
// =============================================================================

/// A validated request to re-encode one source image.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    /// Source image reference (path below the asset root)
    pub source: String,

    /// Target width in CSS pixels (1-3840)
    pub width: u32,

    /// Requested quality (1-100)
    pub quality: u8,

    /// Requested output format
    pub format: ImageFormat,

    /// Device pixel ratio, `None` meaning 1
    pub dpr: Option<f32>,

    /// Whether the client asked to save data
    pub save_data: bool,
}

impl TranscodeRequest {
    /// Create a request with default quality and format.
    pub fn new(source: impl Into<String>, width: u32) -> Self {
        Self {
            source: source.into(),
            width,
            quality: DEFAULT_QUALITY,
            format: DEFAULT_FORMAT,
            dpr: None,
            save_data: false,
        }
    }

    /// Validate raw query parameters into a request.
    pub fn from_query(query: TranscodeQuery) -> Result<Self, TranscodeError> {
        let source = query
            .url
            .filter(|url| !url.trim().is_empty())
            .ok_or(TranscodeError::MissingSource)?;

        if !(MIN_WIDTH..=MAX_WIDTH).contains(&query.w) {
            return Err(TranscodeError::InvalidWidth {
                width: query.w,
                max: MAX_WIDTH,
            });
        }

        if !(1..=100).contains(&query.q) {
            return Err(TranscodeError::InvalidQuality { quality: query.q });
        }

        if let Some(dpr) = query.dpr {
            if !dpr.is_finite() || dpr <= 0.0 || dpr > MAX_DPR {
                return Err(TranscodeError::InvalidDpr { dpr });
            }
        }

        Ok(Self {
            source,
            width: query.w,
            quality: query.q as u8,
            format: ImageFormat::parse_or_jpeg(&query.f),
            dpr: query.dpr,
            save_data: query.save_data.as_deref() == Some("1"),
        })
    }

    /// Effective device pixel ratio.
    pub fn dpr_or_default(&self) -> f32 {
        self.dpr.unwrap_or(1.0)
    }

    /// Pixel width to render: `round(width * dpr)`.
    pub fn adaptive_width(&self) -> u32 {
        (self.width as f32 * self.dpr_or_default()).round().max(1.0) as u32
    }

    /// Serialize into the transcode query string (without leading `?`).
    ///
    /// `dpr` is emitted only when it differs from 1 and `save-data` only
    /// when set, so equivalent requests map to the same cache key.
    pub fn to_query_string(&self) -> String {
        let mut query = format!(
            "url={}&w={}&q={}&f={}",
            urlencoding::encode(&self.source),
            self.width,
            self.quality,
            self.format
        );

        if let Some(dpr) = self.dpr.filter(|dpr| (*dpr - 1.0).abs() > f32::EPSILON) {
            query.push_str(&format!("&dpr={}", dpr));
        }

        if self.save_data {
            query.push_str("&save-data=1");
        }

        query
    }

    /// Build the full request URL for the given endpoint.
    pub fn to_url(&self, endpoint: &str) -> String {
        format!("{}?{}", endpoint, self.to_query_string())
    }
}

// =============================================================================
// Tests
// =============================================================================
