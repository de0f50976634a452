use std::fmt;

use serde::{Deserialize, Serialize};

use crate::transcode::{TranscodeRequest, DEFAULT_QUALITY, MAX_WIDTH, MIN_WIDTH};

use super::format::{negotiate_format, AssumeWebp, FormatCapabilityProbe};
use super::quality::adjust_quality;
use super::ClientHints;

/// Transcode endpoint path used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "/transcode";

/// Fetch priority carried by preload hints and prefetch requests.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum FetchPriority {
    Low,
    #[default]
    Auto,
    High,
}

impl FetchPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchPriority::Low => "low",
            FetchPriority::Auto => "auto",
            FetchPriority::High => "high",
        }
    }
}

impl fmt::Display for FetchPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource hint asking the client to fetch an image eagerly.
#[derive(Debug, Clone, PartialEq)]
pub struct PreloadHint {
    /// Resolved URL at the requested width
    pub href: String,

    /// Density candidates when the device is high-DPI
    pub image_srcset: Option<String>,

    /// Requested fetch priority
    pub priority: FetchPriority,
}

impl PreloadHint {
    /// Render as an HTTP `Link` header value.
    pub fn to_link_header(&self) -> String {
        let mut link = format!(
            "<{}>; rel=preload; as=image; fetchpriority={}",
            self.href, self.priority
        );
        if let Some(srcset) = &self.image_srcset {
            link.push_str(&format!("; imagesrcset=\"{}\"", srcset));
        }
        link
    }
}

/// Resolves logical image references into transcode URLs for one client.
///
/// # Example
///
/// ```
/// use image_edge::hints::{ClientHintResolver, ClientHints, ConnectionClass};
///
/// let hints = ClientHints {
///     connection: ConnectionClass::ThreeG,
///     ..Default::default()
/// };
/// let resolver = ClientHintResolver::new("/transcode", hints);
///
/// let url = resolver.resolve("/img/hero.png", 640);
/// assert_eq!(url, "/transcode?url=%2Fimg%2Fhero.png&w=640&q=70&f=webp");
/// ```
pub struct ClientHintResolver<P: FormatCapabilityProbe = AssumeWebp> {
    endpoint: String,
    hints: ClientHints,
    probe: P,
}

impl ClientHintResolver<AssumeWebp> {
    /// Create a resolver that cannot probe format support.
    pub fn new(endpoint: impl Into<String>, hints: ClientHints) -> Self {
        Self::with_probe(endpoint, hints, AssumeWebp)
    }
}

impl<P: FormatCapabilityProbe> ClientHintResolver<P> {
    /// Create a resolver with a custom capability probe.
    pub fn with_probe(endpoint: impl Into<String>, hints: ClientHints, probe: P) -> Self {
        Self {
            endpoint: endpoint.into(),
            hints,
            probe,
        }
    }

    /// The hints this resolver was built with.
    pub fn hints(&self) -> &ClientHints {
        &self.hints
    }

    /// Build the transcode request for `source` at `width` CSS pixels.
    pub fn request(&self, source: &str, width: u32, quality: u8) -> TranscodeRequest {
        let dpr = self.hints.dpr;
        TranscodeRequest {
            source: source.to_string(),
            width: width.clamp(MIN_WIDTH, MAX_WIDTH),
            quality: adjust_quality(quality, &self.hints),
            format: negotiate_format(&self.hints, &self.probe),
            dpr: (dpr.is_finite() && dpr > 0.0 && (dpr - 1.0).abs() > f32::EPSILON).then_some(dpr),
            save_data: self.hints.save_data,
        }
    }

    /// Resolve `source` at `width` with the default base quality (85).
    pub fn resolve(&self, source: &str, width: u32) -> String {
        self.resolve_with_quality(source, width, DEFAULT_QUALITY)
    }

    /// Resolve `source` at `width` starting from `quality`.
    pub fn resolve_with_quality(&self, source: &str, width: u32, quality: u8) -> String {
        self.request(source, width, quality).to_url(&self.endpoint)
    }

    /// Width-tagged candidate list in `srcset` syntax.
    pub fn build_candidate_set(&self, source: &str, widths: &[u32], quality: u8) -> String {
        widths
            .iter()
            .map(|&width| {
                format!(
                    "{} {}w",
                    self.resolve_with_quality(source, width, quality),
                    width.clamp(MIN_WIDTH, MAX_WIDTH)
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Build a preload hint for `source`.
    ///
    /// On high-DPI devices the hint also advertises density candidates at
    /// `width` and `width * dpr` pixels. Those URLs carry no `dpr` so the
    /// transcoder renders them at exactly the advertised width.
    pub fn preload(
        &self,
        source: &str,
        width: u32,
        quality: u8,
        priority: FetchPriority,
    ) -> PreloadHint {
        let request = self.request(source, width, quality);
        let href = request.to_url(&self.endpoint);

        let image_srcset = (self.hints.dpr > 1.0).then(|| {
            let base = TranscodeRequest {
                dpr: None,
                ..request.clone()
            };
            let dense = TranscodeRequest {
                width: ((request.width as f32 * self.hints.dpr).round() as u32)
                    .clamp(MIN_WIDTH, MAX_WIDTH),
                ..base.clone()
            };
            format!(
                "{} 1x, {} {}x",
                base.to_url(&self.endpoint),
                dense.to_url(&self.endpoint),
                self.hints.dpr
            )
        });

        PreloadHint {
            href,
            image_srcset,
            priority,
        }
    }
}
