//! Image transcoder.
//!
//! Decodes a source image, fits it inside the target width and re-encodes it
//! in the requested format.
//!
//! # Design Decisions
//!
//! - **Never upscale**: the output is at most as wide as the source; aspect
//!   ratio is always preserved.
//!
//! - **Per-format effort**: AVIF is encoded at maximum effort, WebP at a
//!   moderate libwebp method with sharp RGB->YUV conversion, and JPEG with
//!   mozjpeg in progressive mode.
//!
//! - **JPEG XL**: accepted but delivered as WebP; callers can detect the
//!   substitution through [`Transcoded::substituted`].

use std::io::Cursor;
use std::panic::{self, AssertUnwindSafe};

use bytes::Bytes;
use image::codecs::avif::AvifEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageReader};

use crate::error::TranscodeError;
use crate::format::ImageFormat;

/// AVIF encoder speed (1 = slowest, best compression).
const AVIF_SPEED: u8 = 1;

/// libwebp compression method (0 = fast, 6 = slowest).
const WEBP_METHOD: i32 = 4;

/// Output of a transcode.
#[derive(Debug, Clone)]
pub struct Transcoded {
    /// Encoded image bytes
    pub data: Bytes,

    /// Format the bytes are actually in
    pub format: ImageFormat,

    /// Format the caller asked for
    pub requested: ImageFormat,

    /// Output width in pixels
    pub width: u32,

    /// Output height in pixels
    pub height: u32,
}

impl Transcoded {
    /// Whether the delivered format differs from the requested one.
    pub fn substituted(&self) -> bool {
        self.format != self.requested
    }
}

/// Stateless transcoder; cheap to clone and safe to share.
#[derive(Debug, Clone, Default)]
pub struct ImageTranscoder {}

impl ImageTranscoder {
    /// Create a new transcoder.
    pub fn new() -> Self {
        Self {}
    }

    /// Decode `source`, fit it inside `max_width` and encode as `format`.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodeError::DecodeError`] when the source is not an
    /// image and [`TranscodeError::EncodeError`] when encoding fails.
    pub fn transcode(
        &self,
        source: &[u8],
        max_width: u32,
        quality: u8,
        format: ImageFormat,
    ) -> Result<Transcoded, TranscodeError> {
        let img = self.decode(source)?;
        let img = fit_width(img, max_width);
        let delivered = format.delivered();

        let data = match delivered {
            ImageFormat::Avif => encode_avif(&img, quality)?,
            ImageFormat::Webp | ImageFormat::Jxl => encode_webp(&img, quality)?,
            ImageFormat::Jpeg => encode_jpeg(&img, quality)?,
        };

        Ok(Transcoded {
            data,
            format: delivered,
            requested: format,
            width: img.width(),
            height: img.height(),
        })
    }

    fn decode(&self, source: &[u8]) -> Result<DynamicImage, TranscodeError> {
        ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|e| TranscodeError::DecodeError {
                message: e.to_string(),
            })?
            .decode()
            .map_err(|e| TranscodeError::DecodeError {
                message: e.to_string(),
            })
    }
}

/// Shrink `img` to `max_width` (keeping aspect ratio); never enlarges.
fn fit_width(img: DynamicImage, max_width: u32) -> DynamicImage {
    if max_width == 0 || img.width() <= max_width {
        return img;
    }

    let height = ((img.height() as u64 * max_width as u64) as f64 / img.width() as f64)
        .round()
        .max(1.0) as u32;

    img.resize_exact(max_width, height, FilterType::Lanczos3)
}

fn encode_avif(img: &DynamicImage, quality: u8) -> Result<Bytes, TranscodeError> {
    let rgba = img.to_rgba8();
    let mut output = Vec::new();

    AvifEncoder::new_with_speed_quality(&mut output, AVIF_SPEED, quality)
        .write_image(
            rgba.as_raw(),
            rgba.width(),
            rgba.height(),
            ExtendedColorType::Rgba8,
        )
        .map_err(|e| TranscodeError::EncodeError {
            message: e.to_string(),
        })?;

    Ok(Bytes::from(output))
}

fn encode_webp(img: &DynamicImage, quality: u8) -> Result<Bytes, TranscodeError> {
    let rgba = img.to_rgba8();

    let mut config = webp::WebPConfig::new().map_err(|_| TranscodeError::EncodeError {
        message: "failed to initialise WebP config".to_string(),
    })?;
    config.quality = quality as f32;
    config.method = WEBP_METHOD;
    config.use_sharp_yuv = 1;

    let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
    let memory = encoder
        .encode_advanced(&config)
        .map_err(|e| TranscodeError::EncodeError {
            message: format!("{:?}", e),
        })?;

    Ok(Bytes::copy_from_slice(&memory))
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Bytes, TranscodeError> {
    let rgb = img.to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);

    // mozjpeg reports libjpeg failures by unwinding
    let result = panic::catch_unwind(AssertUnwindSafe(|| -> std::io::Result<Vec<u8>> {
        let mut compress = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
        compress.set_size(width, height);
        compress.set_quality(quality as f32);
        compress.set_progressive_mode();
        compress.set_optimize_coding(true);
        compress.set_optimize_scans(true);

        let mut started = compress.start_compress(Vec::new())?;
        started.write_scanlines(rgb.as_raw())?;
        started.finish()
    }));

    match result {
        Ok(Ok(data)) => Ok(Bytes::from(data)),
        Ok(Err(e)) => Err(TranscodeError::EncodeError {
            message: e.to_string(),
        }),
        Err(_) => Err(TranscodeError::EncodeError {
            message: "JPEG encoder aborted".to_string(),
        }),
    }
}

// =============================================================================
// Tests
// =============================================================================
