//! Network conditions observed for the clients an edge instance serves.

use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::hints::ConnectionClass;

/// Last reported network state. Only the latest value matters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub effective_type: ConnectionClass,

    /// Estimated bandwidth in Mbit/s
    pub downlink: Option<f64>,

    pub save_data: bool,
}

impl NetworkInfo {
    /// Read `ECT`, `Downlink` and `Save-Data` request headers.
    ///
    /// Returns `None` when the request carries none of them, so requests
    /// without hints do not reset previously reported state.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let ect = header("ect");
        let downlink = header("downlink");
        let save_data = header("save-data");

        if ect.is_none() && downlink.is_none() && save_data.is_none() {
            return None;
        }

        Some(Self {
            effective_type: ect.and_then(|v| v.parse().ok()).unwrap_or_default(),
            downlink: downlink
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|d| d.is_finite() && *d >= 0.0),
            save_data: save_data.is_some_and(|v| v.trim().eq_ignore_ascii_case("on")),
        })
    }
}
