//! Output image formats shared by the resolver, the transcoder and the edge.

use std::fmt;

/// An encoded image format that can be requested from the transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Avif,
    Webp,
    Jpeg,
    /// Accepted on the wire, currently delivered as WebP
    Jxl,
}

impl ImageFormat {
    /// Parse a format token (`avif`, `webp`, `jpg`, `jpeg`, `jxl`).
    ///
    /// Returns `None` for anything else.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "avif" => Some(ImageFormat::Avif),
            "webp" => Some(ImageFormat::Webp),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "jxl" => Some(ImageFormat::Jxl),
            _ => None,
        }
    }

    /// Parse a format token, treating unknown values as JPEG.
    pub fn parse_or_jpeg(token: &str) -> Self {
        Self::parse(token).unwrap_or(ImageFormat::Jpeg)
    }

    /// MIME type for responses.
    pub fn content_type(self) -> &'static str {
        match self {
            ImageFormat::Avif => "image/avif",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Jxl => "image/jxl",
        }
    }

    /// Token used in transcode query strings.
    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Avif => "avif",
            ImageFormat::Webp => "webp",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Jxl => "jxl",
        }
    }

    /// The format actually produced when this one is requested.
    ///
    /// There is no JPEG XL encoder wired up, so `Jxl` is delivered as WebP.
    pub fn delivered(self) -> Self {
        match self {
            ImageFormat::Jxl => ImageFormat::Webp,
            other => other,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
