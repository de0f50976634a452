//! Server-side adaptive quality.
//!
//! The transcoder recomputes quality from the client-hint headers it
//! receives. This pass is authoritative: it starts from the requested `q`
//! and never trusts whatever correction the client already applied.

use http::HeaderMap;

/// Quality cap when the client asked to save data.
pub const SAVE_DATA_QUALITY_CAP: u8 = 40;

/// Quality cap for mobile-classified requests.
pub const MOBILE_QUALITY_CAP: u8 = 75;

/// Quality cap for narrow viewports.
pub const NARROW_VIEWPORT_QUALITY_CAP: u8 = 80;

/// Viewports narrower than this are considered narrow.
pub const NARROW_VIEWPORT_WIDTH: u32 = 768;

/// Quality reduction for high-density displays.
pub const HIGH_DPR_QUALITY_PENALTY: u8 = 10;

/// Floor for the high-density reduction.
pub const HIGH_DPR_QUALITY_FLOOR: u8 = 30;

/// Densities at or above this get the high-density reduction.
pub const HIGH_DPR_THRESHOLD: f32 = 2.0;

/// Final lower bound on computed quality.
pub const MIN_ADAPTIVE_QUALITY: u8 = 10;

/// Final upper bound on computed quality.
pub const MAX_ADAPTIVE_QUALITY: u8 = 100;

/// Client hints as forwarded in request headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerHints {
    /// `DPR` header
    pub dpr: Option<f32>,

    /// `Width` header (intrinsic resource width)
    pub width: Option<u32>,

    /// `Viewport-Width` header
    pub viewport_width: Option<u32>,

    /// `Save-Data: on`
    pub save_data: bool,

    /// `Sec-CH-UA-Mobile: ?1`
    pub mobile: bool,
}

impl ServerHints {
    /// Read hints from request headers. Malformed values are ignored.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        };

        Self {
            dpr: text("dpr").and_then(|v| v.parse::<f32>().ok()).filter(|v| v.is_finite()),
            width: text("width").and_then(|v| v.parse().ok()),
            viewport_width: text("viewport-width").and_then(|v| v.parse().ok()),
            save_data: text("save-data").is_some_and(|v| v.eq_ignore_ascii_case("on")),
            mobile: text("sec-ch-ua-mobile").is_some_and(|v| v == "?1"),
        }
    }

    /// Compute the quality to encode with.
    ///
    /// `save_data_param` is the `save-data=1` query flag and `dpr_param` the
    /// `dpr` query value; each is combined with its header counterpart.
    pub fn adaptive_quality(&self, requested: u8, save_data_param: bool, dpr_param: Option<f32>) -> u8 {
        let mut quality = requested;

        if self.save_data || save_data_param {
            quality = quality.min(SAVE_DATA_QUALITY_CAP);
        }

        if self.mobile {
            quality = quality.min(MOBILE_QUALITY_CAP);
        }

        let dpr = match (self.dpr, dpr_param) {
            (Some(header), Some(param)) => Some(header.max(param)),
            (header, param) => header.or(param),
        };
        if dpr.is_some_and(|dpr| dpr >= HIGH_DPR_THRESHOLD) {
            quality = quality
                .saturating_sub(HIGH_DPR_QUALITY_PENALTY)
                .max(HIGH_DPR_QUALITY_FLOOR);
        }

        if self
            .viewport_width
            .is_some_and(|width| width < NARROW_VIEWPORT_WIDTH)
        {
            quality = quality.min(NARROW_VIEWPORT_QUALITY_CAP);
        }

        quality.clamp(MIN_ADAPTIVE_QUALITY, MAX_ADAPTIVE_QUALITY)
    }
}

// =============================================================================
// Tests
// =============================================================================
