//! WebP output.
//!
//! Output policy is fixed: lossy at quality 80, RGBA, no metadata chunks.

use bytes::Bytes;
use webp::Encoder;

use crate::error::CodecError;

use super::decode_source;

/// Lossy quality used for every WebP artifact.
const WEBP_QUALITY: f32 = 80.0;

/// Decodes any supported image and re-encodes it as lossy WebP.
#[derive(Debug, Clone, Default)]
pub struct WebpEncoder;

impl WebpEncoder {
    /// Create a new WebP encoder.
    pub fn new() -> Self {
        Self
    }

    /// Encode `source` as WebP.
    pub fn encode(&self, source: &[u8]) -> Result<Bytes, CodecError> {
        let rgba = decode_source(source)?.to_rgba8();

        let output = Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
            .encode_simple(false, WEBP_QUALITY)
            .map_err(|e| CodecError::Encode {
                format: "webp",
                message: format!("{:?}", e),
            })?;

        Ok(Bytes::copy_from_slice(&output))
    }
}
