//! Image codecs.
//!
//! The conversion pipeline treats encoding as a black box behind the
//! [`ImageCodec`] trait: bytes in, bytes in the requested format out, or a
//! [`CodecError`].
//!
//! # Strategies
//!
//! [`StandardCodec`] selects one strategy per [`OutputFormat`]:
//!
//! | Format | Strategy |
//! |--------|----------|
//! | webp   | [`WebpEncoder`]: decode, re-encode as lossy WebP at quality 80 |
//! | jpg    | [`JpegEncoder`]: decode, flatten to RGB, encode at the requested quality |
//! | png    | [`PngQuantEncoder`]: decode, re-encode as PNG, quantize with `pngquant` |
//!
//! None of the encoders copy metadata (EXIF, ICC, text chunks) from the source.

mod jpeg;
mod png;
mod webp;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use image::DynamicImage;

use crate::error::CodecError;
use crate::task::OutputFormat;

pub use jpeg::JpegEncoder;
pub use png::{PngQuantEncoder, DEFAULT_PNGQUANT_PATH, PNGQUANT_QUALITY, PNGQUANT_SPEED};
pub use webp::WebpEncoder;

/// Converts raw image bytes into a target format.
#[async_trait]
pub trait ImageCodec: Send + Sync {
    /// Encode `source` as `format`. `quality` is only meaningful for JPEG.
    async fn encode(
        &self,
        source: Bytes,
        format: OutputFormat,
        quality: u8,
    ) -> Result<Bytes, CodecError>;
}

#[async_trait]
impl<C: ImageCodec + ?Sized> ImageCodec for Arc<C> {
    async fn encode(
        &self,
        source: Bytes,
        format: OutputFormat,
        quality: u8,
    ) -> Result<Bytes, CodecError> {
        (**self).encode(source, format, quality).await
    }
}

/// Decode any supported input image (jpeg, png, webp, gif, bmp).
pub(crate) fn decode_source(source: &[u8]) -> Result<DynamicImage, CodecError> {
    image::load_from_memory(source).map_err(|e| CodecError::Decode {
        message: e.to_string(),
    })
}

// =============================================================================
// Standard Codec
// =============================================================================

/// Production codec dispatching on the output format.
///
/// Encoding runs on tokio's blocking pool so CPU-bound work never stalls the
/// async workers.
#[derive(Debug, Clone, Default)]
pub struct StandardCodec {
    webp: WebpEncoder,
    jpeg: JpegEncoder,
    png: PngQuantEncoder,
}

impl StandardCodec {
    /// Create a codec using `pngquant` from `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec invoking the given `pngquant` binary.
    pub fn with_pngquant(path: impl Into<String>) -> Self {
        Self {
            png: PngQuantEncoder::with_binary(path),
            ..Self::default()
        }
    }

    /// Encode synchronously on the calling thread.
    pub fn encode_blocking(
        &self,
        source: &[u8],
        format: OutputFormat,
        quality: u8,
    ) -> Result<Bytes, CodecError> {
        match format {
            OutputFormat::Webp => self.webp.encode(source),
            OutputFormat::Jpg => self.jpeg.encode(source, quality),
            OutputFormat::Png => self.png.encode(source),
        }
    }
}

#[async_trait]
impl ImageCodec for StandardCodec {
    async fn encode(
        &self,
        source: Bytes,
        format: OutputFormat,
        quality: u8,
    ) -> Result<Bytes, CodecError> {
        let codec = self.clone();
        tokio::task::spawn_blocking(move || codec.encode_blocking(&source, format, quality))
            .await
            .map_err(|e| CodecError::Worker {
                message: e.to_string(),
            })?
    }
}

// =============================================================================
// Tests
// =============================================================================
