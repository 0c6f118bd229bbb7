//! PNG output via `pngquant`.
//!
//! The source is first re-encoded as a plain PNG, then piped through the
//! external `pngquant` quantizer which produces a palette PNG:
//!
//! ```text
//! source ──► decode ──► PNG ──► pngquant stdin ──► stdout ──► artifact
//! ```
//!
//! pngquant must be installed; a missing binary is an encoding failure.

use std::io::{Cursor, Write};
use std::process::{Command, Stdio};

use bytes::Bytes;
use image::ImageFormat;
use tracing::debug;

use crate::error::CodecError;

use super::decode_source;

/// Binary name looked up on `PATH` when no explicit path is configured.
pub const DEFAULT_PNGQUANT_PATH: &str = "pngquant";

/// Quality range passed to pngquant.
pub const PNGQUANT_QUALITY: &str = "65-85";

/// Speed/quality trade-off passed to pngquant (1 is slowest, best).
pub const PNGQUANT_SPEED: &str = "1";

/// Re-encodes images as quantized PNG.
#[derive(Debug, Clone)]
pub struct PngQuantEncoder {
    binary: String,
}

impl PngQuantEncoder {
    /// Create an encoder using `pngquant` from `PATH`.
    pub fn new() -> Self {
        Self::with_binary(DEFAULT_PNGQUANT_PATH)
    }

    /// Create an encoder invoking a specific pngquant binary.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Path of the pngquant binary in use.
    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Decode `source`, re-encode as PNG and quantize.
    pub fn encode(&self, source: &[u8]) -> Result<Bytes, CodecError> {
        let image = decode_source(source)?;

        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| CodecError::Encode {
                format: "png",
                message: e.to_string(),
            })?;

        self.quantize(png)
    }

    /// Run pngquant over an already encoded PNG.
    pub fn quantize(&self, png: Vec<u8>) -> Result<Bytes, CodecError> {
        let mut child = Command::new(&self.binary)
            .arg(format!("--quality={}", PNGQUANT_QUALITY))
            .args(["--speed", PNGQUANT_SPEED, "--strip", "--output", "-", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CodecError::Optimizer {
                message: format!("failed to start {}: {}", self.binary, e),
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| CodecError::Optimizer {
            message: "pngquant stdin unavailable".to_string(),
        })?;

        // Feed stdin from another thread so a full stdout pipe cannot deadlock us
        let input_len = png.len();
        let writer = std::thread::spawn(move || stdin.write_all(&png));

        let output = child.wait_with_output().map_err(|e| CodecError::Optimizer {
            message: e.to_string(),
        })?;

        if !output.status.success() {
            // Exit status 99 means the quality floor could not be met
            return Err(CodecError::Optimizer {
                message: format!(
                    "pngquant exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(CodecError::Optimizer {
                    message: format!("failed to write to pngquant: {}", e),
                })
            }
            Err(_) => {
                return Err(CodecError::Optimizer {
                    message: "pngquant writer thread panicked".to_string(),
                })
            }
        }

        debug!(
            input_bytes = input_len,
            output_bytes = output.stdout.len(),
            "Quantized PNG"
        );
        Ok(Bytes::from(output.stdout))
    }
}

impl Default for PngQuantEncoder {
    fn default() -> Self {
        Self::new()
    }
}
