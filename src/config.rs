//! Configuration management.
//!
//! Settings come from command-line arguments via clap, fall back to
//! environment variables with the `IMGSHIFT_` prefix, and otherwise use the
//! defaults below.
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use imgshift::config::Config;
//!
//! let config = Config::parse();
//! config.validate()?;
//! println!("Listening on {}", config.bind_address());
//! ```
//!
//! # Environment Variables
//!
//! - `IMGSHIFT_HOST` - Server bind address (default: 0.0.0.0)
//! - `IMGSHIFT_PORT` - Server port (default: 8080)
//! - `IMGSHIFT_OUTPUT_DIR` - Artifact directory (default: output)
//! - `IMGSHIFT_MAX_UPLOAD_SIZE` - Upload ceiling, e.g. `10MB`, `512K` (default: 10MB)
//! - `IMGSHIFT_MAX_CONCURRENT_TASKS` - Conversions running at once (default: 3)
//! - `IMGSHIFT_EVICTION_THRESHOLD` - Serves before a sweep deletes artifacts (default: 50)
//! - `IMGSHIFT_SWEEP_INTERVAL` - Seconds between sweeps (default: 10)
//! - `IMGSHIFT_PNGQUANT_PATH` - pngquant binary (default: pngquant)
//! - `IMGSHIFT_CORS_ORIGINS` - Comma-separated allowed origins (default: any)

use std::time::Duration;

use clap::Parser;

use crate::codec::DEFAULT_PNGQUANT_PATH;
use crate::server::DEFAULT_MAX_UPLOAD_SIZE;
use crate::store::{DEFAULT_EVICTION_THRESHOLD, DEFAULT_OUTPUT_DIR, DEFAULT_SWEEP_INTERVAL};
use crate::task::DEFAULT_MAX_CONCURRENT_TASKS;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 8080;


// =============================================================================
// CLI Arguments
// =============================================================================

/// imgshift - An image conversion server.
///
/// Converts uploaded images to webp, png or jpg, runs each distinct
/// (content, format, quality) conversion at most once, and serves the results.
#[derive(Parser, Debug, Clone)]
#[command(name = "imgshift")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "IMGSHIFT_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "IMGSHIFT_PORT")]
    pub port: u16,

    // =========================================================================
    // Conversion Configuration
    // =========================================================================
    /// Directory converted artifacts are written to.
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR, env = "IMGSHIFT_OUTPUT_DIR")]
    pub output_dir: String,

    /// Largest accepted image (B, K/KB, M/MB, G/GB; base 1024).
    #[arg(long, default_value_t = format_size(DEFAULT_MAX_UPLOAD_SIZE), env = "IMGSHIFT_MAX_UPLOAD_SIZE")]
    pub max_upload_size: String,

    /// Maximum number of conversions running at once.
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_TASKS, env = "IMGSHIFT_MAX_CONCURRENT_TASKS")]
    pub max_concurrent_tasks: usize,

    /// Path to the pngquant binary used for PNG output.
    #[arg(long, default_value = DEFAULT_PNGQUANT_PATH, env = "IMGSHIFT_PNGQUANT_PATH")]
    pub pngquant_path: String,

    // =========================================================================
    // Eviction Configuration
    // =========================================================================
    /// Number of served downloads after which served artifacts are deleted.
    #[arg(long, default_value_t = DEFAULT_EVICTION_THRESHOLD, env = "IMGSHIFT_EVICTION_THRESHOLD")]
    pub eviction_threshold: usize,

    /// Seconds between eviction sweeps.
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL.as_secs(), env = "IMGSHIFT_SWEEP_INTERVAL")]
    pub sweep_interval: u64,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "IMGSHIFT_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        match parse_size(&self.max_upload_size) {
            Some(0) | None => {
                return Err(format!(
                    "max_upload_size must be a positive size like 10MB or 512K, got '{}'",
                    self.max_upload_size
                ));
            }
            Some(_) => {}
        }

        if self.max_concurrent_tasks == 0 {
            return Err("max_concurrent_tasks must be greater than 0".to_string());
        }
        if self.eviction_threshold == 0 {
            return Err("eviction_threshold must be greater than 0".to_string());
        }
        if self.sweep_interval == 0 {
            return Err("sweep_interval must be greater than 0".to_string());
        }
        if self.output_dir.trim().is_empty() {
            return Err("output_dir must not be empty".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Upload ceiling in bytes (call validate() first).
    pub fn max_upload_bytes(&self) -> usize {
        parse_size(&self.max_upload_size).unwrap_or(0)
    }

    /// Period between eviction sweeps.
    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }
}

/// Parse a human-readable byte size such as `10MB`, `512k` or `2048`.
///
/// Units are case-insensitive and binary (`1K` = 1024 bytes). Returns `None`
/// for anything that is not a non-negative integer with an optional unit.
pub fn parse_size(raw: &str) -> Option<usize> {
    let upper = raw.trim().to_ascii_uppercase();

    const UNITS: [(&str, usize); 7] = [
        ("GB", 1024 * 1024 * 1024),
        ("G", 1024 * 1024 * 1024),
        ("MB", 1024 * 1024),
        ("M", 1024 * 1024),
        ("KB", 1024),
        ("K", 1024),
        ("B", 1),
    ];

    let (number, multiplier) = UNITS
        .iter()
        .find_map(|(suffix, mult)| upper.strip_suffix(suffix).map(|n| (n, *mult)))
        .unwrap_or((upper.as_str(), 1));

    number.trim().parse::<usize>().ok()?.checked_mul(multiplier)
}

/// Render a byte count in the largest unit that divides it exactly.
pub fn format_size(bytes: usize) -> String {
    const UNITS: [(&str, usize); 3] = [
        ("GB", 1024 * 1024 * 1024),
        ("MB", 1024 * 1024),
        ("KB", 1024),
    ];

    UNITS
        .iter()
        .find(|(_, size)| bytes >= *size && bytes % size == 0)
        .map(|(suffix, size)| format!("{}{}", bytes / size, suffix))
        .unwrap_or_else(|| format!("{}B", bytes))
}

// =============================================================================
// Tests
// =============================================================================
