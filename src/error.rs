use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while validating an inbound conversion request.
///
/// These are resolved at the ingress boundary; none of them ever creates a
/// task record.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    /// Requested output format is not one of webp, png or jpg
    #[error("Unsupported format: {format} (only webp/png/jpg supported)")]
    UnsupportedFormat { format: String },

    /// Upload exceeds the configured byte ceiling
    #[error("Payload too large: exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },

    /// Transport encoding of the payload could not be decoded
    #[error("Decode error: {message}")]
    DecodeError { message: String },

    /// Multipart upload did not contain the image field
    #[error("Missing file: expected a multipart field named '{field}'")]
    MissingFile { field: &'static str },

    /// Multipart body could not be read
    #[error("Invalid multipart body: {message}")]
    InvalidMultipart { message: String },

    /// The service is draining and accepts no new conversions
    #[error("Service is shutting down and accepts no new conversions")]
    ShuttingDown,
}

/// Errors from the image codec.
///
/// The conversion pipeline does not distinguish between these; every variant
/// is recorded as [`TaskFailure::EncodingFailed`].
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// Source bytes are not a decodable image
    #[error("Failed to decode source image: {message}")]
    Decode { message: String },

    /// Encoding to the target format failed
    #[error("Failed to encode {format}: {message}")]
    Encode {
        format: &'static str,
        message: String,
    },

    /// External PNG optimizer failed to start or exited unsuccessfully
    #[error("PNG optimizer failed: {message}")]
    Optimizer { message: String },

    /// Blocking worker running the codec panicked or was cancelled
    #[error("Codec worker failed: {message}")]
    Worker { message: String },
}

/// Errors from the output artifact store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Output directory does not exist and cannot be created
    #[error("Output directory unavailable: {}: {message}", path.display())]
    DirectoryUnavailable { path: PathBuf, message: String },

    /// Artifact could not be persisted
    #[error("Failed to write artifact {}: {message}", path.display())]
    WriteFailed { path: PathBuf, message: String },

    /// No artifact exists for the digest
    #[error("Artifact not found: {digest}")]
    NotFound { digest: String },

    /// Any other filesystem error
    #[error("I/O error: {0}")]
    Io(String),
}

/// Terminal failure recorded against a task.
///
/// This is the vocabulary the ingress adapters report back to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TaskFailure {
    /// Output directory could not be prepared
    #[error("output directory unavailable")]
    DirectoryUnavailable,

    /// Codec failed for any reason
    #[error("encoding failed")]
    EncodingFailed,

    /// Encoded artifact could not be written
    #[error("storage write failed")]
    StorageWriteFailed,

    /// Job ended without reporting an outcome (panic)
    #[error("conversion aborted")]
    Aborted,
}

impl From<&StoreError> for TaskFailure {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::DirectoryUnavailable { .. } => TaskFailure::DirectoryUnavailable,
            _ => TaskFailure::StorageWriteFailed,
        }
    }
}
