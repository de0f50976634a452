//! Client Hint Resolver.
//!
//! Runs next to the requesting client and turns a logical image reference
//! plus a desired rendering width into a concrete, cache-friendly transcode
//! URL. Everything here is a pure function of local signals; the only output
//! that leaves the process is the preload hint.
//!
//! ```text
//!   ClientHints ──┬──► adjust_quality ──┐
//!                 │                     ├──► TranscodeRequest ──► URL / srcset / Link
//!   Probe ────────┴──► negotiate_format ┘
//! ```
//!
//! The transcoder recomputes quality from forwarded headers on its own; the
//! two computations are independent and may disagree.

mod format;
mod quality;
mod resolver;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use format::{negotiate_format, AcceptHeaderProbe, AssumeWebp, FormatCapabilityProbe};
pub use quality::{adjust_quality, SAVE_DATA_QUALITY_CAP};
pub use resolver::{ClientHintResolver, FetchPriority, PreloadHint, DEFAULT_ENDPOINT};

/// Coarse network class, as reported by the Network Information API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionClass {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl ConnectionClass {
    /// Token as used in `ECT` headers.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionClass::Slow2g => "slow-2g",
            ConnectionClass::TwoG => "2g",
            ConnectionClass::ThreeG => "3g",
            ConnectionClass::FourG => "4g",
            ConnectionClass::Unknown => "unknown",
        }
    }

    /// `slow-2g` and `2g`.
    pub fn is_slowest(self) -> bool {
        matches!(self, ConnectionClass::Slow2g | ConnectionClass::TwoG)
    }

    /// `4g`.
    pub fn is_fastest(self) -> bool {
        matches!(self, ConnectionClass::FourG)
    }
}

impl FromStr for ConnectionClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slow-2g" => Ok(ConnectionClass::Slow2g),
            "2g" => Ok(ConnectionClass::TwoG),
            "3g" => Ok(ConnectionClass::ThreeG),
            "4g" => Ok(ConnectionClass::FourG),
            "unknown" | "" => Ok(ConnectionClass::Unknown),
            other => Err(format!("unknown connection class: {}", other)),
        }
    }
}

impl fmt::Display for ConnectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device and network signals captured on the client at request time.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientHints {
    /// Device pixel ratio
    pub dpr: f32,

    /// Layout viewport width in CSS pixels
    pub viewport_width: Option<u32>,

    /// User asked to reduce data usage
    pub save_data: bool,

    /// Effective connection class
    pub connection: ConnectionClass,
}

impl Default for ClientHints {
    fn default() -> Self {
        Self {
            dpr: 1.0,
            viewport_width: None,
            save_data: false,
            connection: ConnectionClass::Unknown,
        }
    }
}
