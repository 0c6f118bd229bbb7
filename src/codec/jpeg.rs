//! JPEG output.

use bytes::Bytes;
use image::codecs::jpeg;

use crate::error::CodecError;
use crate::task::{MAX_JPEG_QUALITY, MIN_JPEG_QUALITY};

use super::decode_source;

/// Decodes any supported image and re-encodes it as baseline JPEG.
///
/// Alpha is discarded since JPEG has no transparency.
#[derive(Debug, Clone, Default)]
pub struct JpegEncoder;

impl JpegEncoder {
    /// Create a new JPEG encoder.
    pub fn new() -> Self {
        Self
    }

    /// Encode at `quality`, clamped to 1-100.
    pub fn encode(&self, source: &[u8], quality: u8) -> Result<Bytes, CodecError> {
        let quality = quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY);
        let rgb = decode_source(source)?.to_rgb8();

        let mut output = Vec::new();
        let mut encoder = jpeg::JpegEncoder::new_with_quality(&mut output, quality);
        encoder
            .encode_image(&rgb)
            .map_err(|e| CodecError::Encode {
                format: "jpg",
                message: e.to_string(),
            })?;

        Ok(Bytes::from(output))
    }
}
