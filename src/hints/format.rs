//! Output format negotiation.

use crate::format::ImageFormat;

use super::ClientHints;

/// Answers whether the client can render a given image format.
///
/// Browser-side probing is platform specific; on a server there is usually
/// nothing to probe, which is what [`AssumeWebp`] models.
pub trait FormatCapabilityProbe: Send + Sync {
    /// Whether `format` is known to be supported.
    fn supports(&self, format: ImageFormat) -> bool;
}

/// Probe used when capabilities cannot be detected: WebP only.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeWebp;

impl FormatCapabilityProbe for AssumeWebp {
    fn supports(&self, format: ImageFormat) -> bool {
        matches!(format, ImageFormat::Webp | ImageFormat::Jpeg)
    }
}

/// Probe driven by an HTTP `Accept` header value.
#[derive(Debug, Clone, Default)]
pub struct AcceptHeaderProbe {
    accept: String,
}

impl AcceptHeaderProbe {
    pub fn new(accept: impl Into<String>) -> Self {
        Self {
            accept: accept.into().to_ascii_lowercase(),
        }
    }
}

impl FormatCapabilityProbe for AcceptHeaderProbe {
    fn supports(&self, format: ImageFormat) -> bool {
        if format == ImageFormat::Jpeg {
            return true;
        }

        let mime = format.content_type();
        self.accept.split(',').any(|item| {
            let mut parts = item.split(';').map(str::trim);
            let matches = parts.next() == Some(mime);
            let refused = parts.any(|p| p.replace(' ', "") == "q=0");
            matches && !refused
        })
    }
}

/// Choose an output format for the current client.
///
/// Constrained clients (save-data, `slow-2g`/`2g`) always get WebP without
/// probing. Otherwise AVIF is preferred, then WebP, then JPEG.
pub fn negotiate_format(hints: &ClientHints, probe: &dyn FormatCapabilityProbe) -> ImageFormat {
    if hints.save_data || hints.connection.is_slowest() {
        return ImageFormat::Webp;
    }

    if probe.supports(ImageFormat::Avif) {
        ImageFormat::Avif
    } else if probe.supports(ImageFormat::Webp) {
        ImageFormat::Webp
    } else {
        ImageFormat::Jpeg
    }
}
