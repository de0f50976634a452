//! Transcoding service layer.
//!
//! Turns a source image reference plus target geometry into re-encoded
//! bytes, applying server-side adaptive quality from forwarded client hints.
//!
//! # Components
//!
//! - [`TranscodeRequest`]: validated descriptor (source, width, quality, format, dpr, save-data)
//! - [`ServerHints`]: client hints read from request headers, and the authoritative quality policy
//! - [`ImageTranscoder`]: decode → fit width → encode (AVIF / WebP / progressive JPEG)
//! - [`TranscodeService`]: resolves sources below the asset root and drives the pipeline
//!
//! # Example
//!
//! ```no_run
//! use image_edge::transcode::{ServerHints, TranscodeRequest, TranscodeService};
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = TranscodeService::new("./public");
//!     let request = TranscodeRequest::new("/hero.png", 640);
//!
//!     let response = service
//!         .transcode(&request, &ServerHints::default())
//!         .await
//!         .unwrap();
//!     println!("{} bytes of {}", response.data.len(), response.format);
//! }
//! ```

mod encoder;
mod quality;
mod request;
mod service;

pub use encoder::{ImageTranscoder, Transcoded};
pub use quality::{
    ServerHints, HIGH_DPR_QUALITY_FLOOR, HIGH_DPR_QUALITY_PENALTY, HIGH_DPR_THRESHOLD,
    MAX_ADAPTIVE_QUALITY, MIN_ADAPTIVE_QUALITY, MOBILE_QUALITY_CAP, NARROW_VIEWPORT_QUALITY_CAP,
    NARROW_VIEWPORT_WIDTH, SAVE_DATA_QUALITY_CAP,
};
pub use request::{
    TranscodeQuery, TranscodeRequest, DEFAULT_FORMAT, DEFAULT_QUALITY, DEFAULT_WIDTH, MAX_DPR,
    MAX_WIDTH, MIN_WIDTH,
};
pub use service::{TranscodeResponse, TranscodeService};
