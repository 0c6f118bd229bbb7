//! Identity of a conversion request.
//!
//! A [`Fingerprint`] is the triple (content digest, output format, quality).
//! Two submissions with the same fingerprint are the same logical task.
//!
//! # Normalization
//!
//! - Format strings are trimmed and lowercased, `jpeg` becomes `jpg`, and an
//!   empty string means `webp`.
//! - JPEG quality outside `1..=100` is replaced with [`DEFAULT_JPEG_QUALITY`].
//! - Quality is always `0` for webp and png, so a client-supplied quality can
//!   never split a non-JPEG task into several.

use std::fmt;
use std::str::FromStr;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::error::RequestError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// Output Format
// =============================================================================

/// Target encoding of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Webp,
    Png,
    Jpg,
}

impl OutputFormat {
    /// All formats, in the order artifacts are looked up when resolving a digest.
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Webp, OutputFormat::Png, OutputFormat::Jpg];

    /// Normalize and parse a client-supplied format string.
    pub fn parse(raw: &str) -> Result<Self, RequestError> {
        let normalized = raw.trim().to_lowercase();
        match normalized.as_str() {
            "" | "webp" => Ok(OutputFormat::Webp),
            "png" => Ok(OutputFormat::Png),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
            _ => Err(RequestError::UnsupportedFormat { format: normalized }),
        }
    }

    /// Canonical name, also used as the file extension.
    pub const fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Webp => "webp",
            OutputFormat::Png => "png",
            OutputFormat::Jpg => "jpg",
        }
    }

    /// MIME type served for artifacts of this format.
    pub const fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Webp => "image/webp",
            OutputFormat::Png => "image/png",
            OutputFormat::Jpg => "image/jpeg",
        }
    }

    /// Whether the quality component of a fingerprint is meaningful.
    pub const fn uses_quality(&self) -> bool {
        matches!(self, OutputFormat::Jpg)
    }

    /// Quality to record for a requested value.
    ///
    /// Non-JPEG formats always yield 0.
    pub fn effective_quality(&self, requested: i64) -> u8 {
        if !self.uses_quality() {
            return 0;
        }
        if requested < MIN_JPEG_QUALITY as i64 || requested > MAX_JPEG_QUALITY as i64 {
            DEFAULT_JPEG_QUALITY
        } else {
            requested as u8
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputFormat::parse(s)
    }
}

// =============================================================================
// Content Digest
// =============================================================================

/// 128-bit MD5 digest of the raw uploaded bytes.
///
/// Used for deduplication only, not integrity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest([u8; 16]);

impl ContentDigest {
    /// Hash raw image bytes.
    pub fn of(data: &[u8]) -> Self {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&Md5::digest(data));
        Self(bytes)
    }

    /// Parse a 32-character hex digest. Returns `None` for anything else.
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(hex_str.trim(), &mut bytes).ok()?;
        Some(Self(bytes))
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

// =============================================================================
// Fingerprint
// =============================================================================

/// Identity key of a conversion task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    /// Digest of the source bytes
    pub digest: ContentDigest,

    /// Target format
    pub format: OutputFormat,

    /// JPEG quality (1-100), always 0 for other formats
    pub quality: u8,
}

impl Fingerprint {
    /// Fingerprint raw bytes for a target format and requested quality.
    pub fn new(data: &[u8], format: OutputFormat, requested_quality: i64) -> Self {
        Self::from_digest(ContentDigest::of(data), format, requested_quality)
    }

    /// Build a fingerprint from an already computed digest.
    pub fn from_digest(digest: ContentDigest, format: OutputFormat, requested_quality: i64) -> Self {
        Self {
            digest,
            format,
            quality: format.effective_quality(requested_quality),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.format.uses_quality() {
            write!(f, "{}/{}@{}", self.digest, self.format, self.quality)
        } else {
            write!(f, "{}/{}", self.digest, self.format)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
