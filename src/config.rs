//! Configuration management for image-edge.
//!
//! This module provides the command-line interface for the three binaries
//! folded into one executable:
//! - `serve`: the transcoding service
//! - `edge`: the caching edge proxy
//! - `resolve`: print resolved transcode URLs for a set of client hints
//!
//! Every option can also be set through an environment variable with the
//! `IMG_` prefix.
//!
//! # Environment Variables
//!
//! - `IMG_HOST` - Bind address (default: 0.0.0.0)
//! - `IMG_PORT` - Transcode server port (default: 3000)
//! - `IMG_ASSET_ROOT` - Directory holding source images (default: ./public)
//! - `IMG_CORS_ORIGINS` - Allowed CORS origins, comma separated
//! - `IMG_EDGE_PORT` - Edge proxy port (default: 3100)
//! - `IMG_UPSTREAM` - Origin the edge forwards to (default: http://127.0.0.1:3000)
//! - `IMG_CACHE_DIR` - Directory for the disk cache (default: in memory)
//! - `IMG_CACHE_MAX_SIZE` - Image store ceiling in bytes (default: 100 MiB)
//! - `IMG_CACHE_VERSION` - Cache version tag (default: v1)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use url::Url;

use crate::edge::{EdgeCacheConfig, EvictionPolicy, NetworkInfo};
use crate::hints::{ClientHints, ConnectionClass, FetchPriority, DEFAULT_ENDPOINT};
use crate::transcode::{DEFAULT_QUALITY, DEFAULT_WIDTH, MAX_DPR, MAX_WIDTH, MIN_WIDTH};

// =============================================================================
// Default Values
// =============================================================================

/// Default bind address.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default transcode server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default edge proxy port.
pub const DEFAULT_EDGE_PORT: u16 = 3100;

/// Default asset directory.
pub const DEFAULT_ASSET_ROOT: &str = "./public";

/// Default origin for the edge proxy.
pub const DEFAULT_UPSTREAM: &str = "http://127.0.0.1:3000";

/// Default image store ceiling (100 MiB).
pub const DEFAULT_CACHE_MAX_SIZE: u64 = 100 * 1024 * 1024;

/// Default image entry age before a background refresh (24 hours).
pub const DEFAULT_MAX_AGE_SECS: u64 = 24 * 60 * 60;

/// Default manifest freshness window (1 hour).
pub const DEFAULT_MANIFEST_TTL_SECS: u64 = 60 * 60;

/// Default image fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

/// Default preflight max-age (24 hours).
pub const DEFAULT_PREFLIGHT_MAX_AGE: u32 = 86400;

// =============================================================================
// CLI Arguments
// =============================================================================

/// image-edge - Adaptive image delivery: transcoding, edge caching and
/// client-hint resolution.
#[derive(Parser, Debug, Clone)]
#[command(name = "image-edge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the transcoding service.
    Serve(ServeConfig),

    /// Run the caching edge proxy in front of a transcoding service.
    Edge(EdgeConfig),

    /// Print the transcode URL (and optional srcset / preload header) for a
    /// source image under the given client hints.
    Resolve(ResolveConfig),
}

// =============================================================================
// Serve
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "IMG_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "IMG_PORT")]
    pub port: u16,

    /// Directory source images are read from.
    #[arg(long, default_value = DEFAULT_ASSET_ROOT, env = "IMG_ASSET_ROOT")]
    pub asset_root: PathBuf,

    /// Path of the transcode endpoint.
    #[arg(long, default_value = DEFAULT_ENDPOINT, env = "IMG_ENDPOINT")]
    pub endpoint: String,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "IMG_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Cache lifetime of OPTIONS and CORS preflight responses, in seconds.
    #[arg(long, default_value_t = DEFAULT_PREFLIGHT_MAX_AGE, env = "IMG_PREFLIGHT_MAX_AGE")]
    pub preflight_max_age: u32,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.asset_root.as_os_str().is_empty() {
            return Err("asset_root must not be empty. Set --asset-root or IMG_ASSET_ROOT".to_string());
        }
        validate_path("endpoint", &self.endpoint)?;
        if self.endpoint == "/health" {
            return Err("endpoint must not shadow /health".to_string());
        }
        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Edge
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct EdgeConfig {
    /// Host address to bind the proxy to.
    #[arg(long, default_value = DEFAULT_HOST, env = "IMG_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_EDGE_PORT, env = "IMG_EDGE_PORT")]
    pub port: u16,

    /// Origin requests are forwarded to.
    #[arg(long, default_value = DEFAULT_UPSTREAM, env = "IMG_UPSTREAM")]
    pub upstream: String,

    /// Keep cache stores on disk under this directory instead of in memory.
    #[arg(long, env = "IMG_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Image store ceiling in bytes.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_SIZE, env = "IMG_CACHE_MAX_SIZE")]
    pub cache_max_size: u64,

    /// Age in seconds after which cached images are refreshed in the background.
    #[arg(long, default_value_t = DEFAULT_MAX_AGE_SECS, env = "IMG_CACHE_MAX_AGE")]
    pub max_age: u64,

    /// Age in seconds after which the cached manifest is refreshed.
    #[arg(long, default_value_t = DEFAULT_MANIFEST_TTL_SECS, env = "IMG_MANIFEST_TTL")]
    pub manifest_ttl: u64,

    /// Image fetch timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT_SECS, env = "IMG_FETCH_TIMEOUT")]
    pub fetch_timeout: u64,

    /// Cache version tag; stores of other versions are deleted on start.
    #[arg(long, default_value = "v1", env = "IMG_CACHE_VERSION")]
    pub cache_version: String,

    /// Prefix of every store name this proxy owns.
    #[arg(long, default_value = "image-cache", env = "IMG_CACHE_PREFIX")]
    pub cache_prefix: String,

    /// Requests whose path starts with this are cached as images.
    #[arg(long, default_value = DEFAULT_ENDPOINT, env = "IMG_IMAGE_PATH_PREFIX")]
    pub image_path_prefix: String,

    /// Requests whose path ends with this are cached as the image manifest.
    #[arg(long, default_value = "image-manifest.json", env = "IMG_MANIFEST_SUFFIX")]
    pub manifest_suffix: String,

    /// Eviction order when the image store exceeds its ceiling.
    #[arg(long, value_enum, default_value_t = EvictionPolicy::OldestFirst, env = "IMG_EVICTION")]
    pub eviction: EvictionPolicy,

    /// Share of entries removed by one eviction pass.
    #[arg(long, default_value_t = 0.25, env = "IMG_EVICTION_FRACTION")]
    pub eviction_fraction: f64,

    /// Initial connection class, until clients report one (slow-2g, 2g, 3g, 4g).
    #[arg(long, default_value = "unknown", env = "IMG_CONNECTION")]
    pub connection: ConnectionClass,

    /// Initial downlink estimate in Mbit/s.
    #[arg(long, env = "IMG_DOWNLINK")]
    pub downlink: Option<f64>,

    /// Start with save-data on.
    #[arg(long, default_value_t = false, env = "IMG_SAVE_DATA")]
    pub save_data: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl EdgeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.upstream_url()?;

        if self.cache_max_size == 0 {
            return Err("cache_max_size must be greater than 0".to_string());
        }
        if self.fetch_timeout == 0 {
            return Err("fetch_timeout must be greater than 0".to_string());
        }
        if !(self.eviction_fraction > 0.0 && self.eviction_fraction <= 1.0) {
            return Err("eviction_fraction must be in (0, 1]".to_string());
        }

        validate_store_token("cache_version", &self.cache_version)?;
        validate_store_token("cache_prefix", &self.cache_prefix)?;
        validate_path("image_path_prefix", &self.image_path_prefix)?;

        if self.manifest_suffix.trim().is_empty() {
            return Err("manifest_suffix must not be empty".to_string());
        }
        if let Some(downlink) = self.downlink {
            if !downlink.is_finite() || downlink < 0.0 {
                return Err("downlink must be a non-negative number".to_string());
            }
        }

        Ok(())
    }

    /// Get the proxy bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parse the upstream origin.
    pub fn upstream_url(&self) -> Result<Url, String> {
        let url = Url::parse(&self.upstream)
            .map_err(|e| format!("Invalid upstream URL '{}': {}", self.upstream, e))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(format!("Unsupported upstream scheme: {}", scheme)),
        }
    }

    /// Build the cache manager configuration.
    pub fn to_cache_config(&self) -> EdgeCacheConfig {
        EdgeCacheConfig {
            cache_prefix: self.cache_prefix.clone(),
            version: self.cache_version.clone(),
            max_size: self.cache_max_size,
            max_age: Duration::from_secs(self.max_age),
            manifest_ttl: Duration::from_secs(self.manifest_ttl),
            fetch_timeout: Duration::from_secs(self.fetch_timeout),
            eviction_fraction: self.eviction_fraction,
            eviction_policy: self.eviction,
            image_path_prefix: self.image_path_prefix.clone(),
            manifest_suffix: self.manifest_suffix.clone(),
            ..EdgeCacheConfig::default()
        }
    }

    /// Network conditions assumed until a client reports its own.
    pub fn network_info(&self) -> NetworkInfo {
        NetworkInfo {
            effective_type: self.connection,
            downlink: self.downlink,
            save_data: self.save_data,
        }
    }
}

// =============================================================================
// Resolve
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ResolveConfig {
    /// Source image reference (path below the asset root).
    pub source: String,

    /// Rendering width in CSS pixels.
    #[arg(short, long, default_value_t = DEFAULT_WIDTH)]
    pub width: u32,

    /// Base quality before hint adjustment (1-100).
    #[arg(short, long, default_value_t = DEFAULT_QUALITY)]
    pub quality: u8,

    /// Transcode endpoint (path or absolute URL).
    #[arg(long, default_value = DEFAULT_ENDPOINT, env = "IMG_ENDPOINT")]
    pub endpoint: String,

    /// Device pixel ratio.
    #[arg(long, default_value_t = 1.0)]
    pub dpr: f32,

    /// Viewport width in CSS pixels.
    #[arg(long)]
    pub viewport_width: Option<u32>,

    /// Client asked to save data.
    #[arg(long, default_value_t = false)]
    pub save_data: bool,

    /// Effective connection class (slow-2g, 2g, 3g, 4g, unknown).
    #[arg(long, default_value = "unknown")]
    pub connection: ConnectionClass,

    /// `Accept` header used to probe format support; WebP is assumed if absent.
    #[arg(long)]
    pub accept: Option<String>,

    /// Also print a srcset for these widths (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub widths: Option<Vec<u32>>,

    /// Also print a preload `Link` header with this fetch priority.
    #[arg(long, value_enum)]
    pub preload: Option<FetchPriority>,
}

impl ResolveConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.source.trim().is_empty() {
            return Err("source must not be empty".to_string());
        }
        let widths = std::iter::once(self.width).chain(self.widths.iter().flatten().copied());
        for width in widths {
            if !(MIN_WIDTH..=MAX_WIDTH).contains(&width) {
                return Err(format!("width must be between {} and {}", MIN_WIDTH, MAX_WIDTH));
            }
        }
        if self.quality == 0 || self.quality > 100 {
            return Err("quality must be between 1 and 100".to_string());
        }
        if !self.dpr.is_finite() || self.dpr <= 0.0 || self.dpr > MAX_DPR {
            return Err(format!("dpr must be in (0, {}]", MAX_DPR));
        }
        Ok(())
    }

    /// Client hints described by the flags.
    pub fn hints(&self) -> ClientHints {
        ClientHints {
            dpr: self.dpr,
            viewport_width: self.viewport_width,
            save_data: self.save_data,
            connection: self.connection,
        }
    }
}

fn validate_path(name: &str, path: &str) -> Result<(), String> {
    if !path.starts_with('/') || path.len() < 2 {
        return Err(format!("{} must be a path starting with '/': {:?}", name, path));
    }
    Ok(())
}

fn validate_store_token(name: &str, value: &str) -> Result<(), String> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !value.starts_with('.');
    if !valid {
        return Err(format!(
            "{} may only contain letters, digits, '-', '_' and '.': {:?}",
            name, value
        ));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
