//! HTTP request handlers.
//!
//! # Endpoints
//!
//! - `POST /upload` - Submit an image for conversion (multipart)
//! - `GET /download/{md5}` - Fetch a converted artifact
//! - `GET /queue/{md5}` - List live tasks for a digest
//! - `GET /status/{md5}` - List task statuses for a digest
//! - `GET /health` - Health check endpoint

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::codec::ImageCodec;
use crate::error::{RequestError, StoreError};
use crate::task::{
    ConversionRequest, ConversionService, Fingerprint, OutputFormat, Submission, TaskStatus,
};

/// Multipart field carrying the image.
pub const PICTURE_FIELD: &str = "picture";

/// Default upload ceiling: 10 MiB.
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState<C> {
    /// Conversion pipeline
    pub service: ConversionService<C>,

    /// Largest accepted image, in bytes
    pub max_upload_size: usize,
}

impl<C: ImageCodec + 'static> AppState<C> {
    /// Create application state with the default upload ceiling.
    pub fn new(service: ConversionService<C>) -> Self {
        Self {
            service,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        }
    }

    /// Set the upload ceiling in bytes.
    pub fn with_max_upload_size(mut self, max_upload_size: usize) -> Self {
        self.max_upload_size = max_upload_size;
        self
    }
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            max_upload_size: self.max_upload_size,
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "unsupported_format")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Create a new error response with status code.
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Body of a successful upload.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub md5: String,
    pub format: OutputFormat,
    pub quality: u8,
}

impl UploadResponse {
    fn new(message: &str, fingerprint: &Fingerprint) -> Self {
        Self {
            message: message.to_string(),
            md5: fingerprint.digest.to_hex(),
            format: fingerprint.format,
            quality: fingerprint.quality,
        }
    }
}

/// One live task in the queue listing.
#[derive(Debug, Serialize)]
pub struct QueueEntryResponse {
    pub md5: String,
    pub filename: String,
    pub format: OutputFormat,
    pub quality: u8,
}

/// One task in the status listing.
#[derive(Debug, Serialize)]
pub struct StatusEntryResponse {
    pub md5: String,
    pub status: TaskStatus,
    pub format: OutputFormat,
    pub quality: u8,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Log an error response by severity and render it.
fn error_response(status: StatusCode, error_type: &str, message: String) -> Response {
    if status.is_server_error() {
        error!(
            error_type = error_type,
            status = status.as_u16(),
            "Server error: {}",
            message
        );
    } else if status == StatusCode::NOT_FOUND {
        // Expected during polling
        debug!(
            error_type = error_type,
            status = status.as_u16(),
            "Not found: {}",
            message
        );
    } else if status.is_client_error() {
        warn!(
            error_type = error_type,
            status = status.as_u16(),
            "Client error: {}",
            message
        );
    }

    let body = ErrorResponse::with_status(error_type, message, status);
    (status, Json(body)).into_response()
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            RequestError::UnsupportedFormat { .. } => {
                (StatusCode::BAD_REQUEST, "unsupported_format")
            }
            RequestError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large")
            }
            RequestError::DecodeError { .. } => (StatusCode::BAD_REQUEST, "decode_error"),
            RequestError::MissingFile { .. } => (StatusCode::BAD_REQUEST, "missing_file"),
            RequestError::InvalidMultipart { .. } => (StatusCode::BAD_REQUEST, "invalid_multipart"),
            RequestError::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable"),
        };
        error_response(status, error_type, self.to_string())
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            StoreError::DirectoryUnavailable { .. }
            | StoreError::WriteFailed { .. }
            | StoreError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
        };
        error_response(status, error_type, self.to_string())
    }
}

fn multipart_error(err: MultipartError, limit: usize) -> RequestError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        RequestError::PayloadTooLarge { limit }
    } else {
        RequestError::InvalidMultipart {
            message: err.body_text(),
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Fields collected from an upload form.
#[derive(Default)]
struct UploadForm {
    picture: Option<(String, Bytes)>,
    format: Option<String>,
    quality: Option<String>,
}

async fn read_upload_form(
    multipart: &mut Multipart,
    limit: usize,
) -> Result<UploadForm, RequestError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        match field.name() {
            Some(PICTURE_FIELD) => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
                form.picture = Some((filename, data));
            }
            Some("format") => {
                form.format = Some(field.text().await.map_err(|e| multipart_error(e, limit))?);
            }
            Some("quality") => {
                form.quality = Some(field.text().await.map_err(|e| multipart_error(e, limit))?);
            }
            _ => {}
        }
    }

    Ok(form)
}

/// Handle image uploads.
///
/// # Endpoint
///
/// `POST /upload`
///
/// # Form Fields
///
/// - `picture`: the image file (required)
/// - `format`: `webp` (default), `png`, `jpg` or `jpeg`
/// - `quality`: JPEG quality 1-100, default 80; ignored for other formats
///
/// # Response
///
/// - `202 Accepted`: a conversion was queued, or an identical one is in flight
/// - `200 OK`: this fingerprint was already processed
///
/// ```json
/// {"message": "...", "md5": "...", "format": "jpg", "quality": 80}
/// ```
///
/// # Errors
///
/// - `400 Bad Request`: missing `picture` field, or unsupported format
/// - `413 Payload Too Large`: image exceeds the upload ceiling
/// - `503 Service Unavailable`: the server is shutting down
pub async fn upload_handler<C>(
    State(state): State<AppState<C>>,
    mut multipart: Multipart,
) -> Result<Response, RequestError>
where
    C: ImageCodec + 'static,
{
    let limit = state.max_upload_size;
    let form = read_upload_form(&mut multipart, limit).await?;

    let (filename, data) = form.picture.ok_or(RequestError::MissingFile {
        field: PICTURE_FIELD,
    })?;
    if data.len() > limit {
        return Err(RequestError::PayloadTooLarge { limit });
    }

    let format = OutputFormat::parse(form.format.as_deref().unwrap_or_default())?;
    // Unparseable quality falls back to the default, like any out-of-range value
    let quality = form
        .quality
        .as_deref()
        .and_then(|q| q.trim().parse::<i64>().ok())
        .unwrap_or(0);
    let fingerprint = Fingerprint::new(&data, format, quality);

    info!(task = %fingerprint, filename = %filename, bytes = data.len(), "Upload received");

    let request = ConversionRequest::new(fingerprint, filename, data);
    let response = match state.service.submit(request) {
        Submission::AlreadyCompleted(fp) => (
            StatusCode::OK,
            Json(UploadResponse::new(
                "Image already processed for this format/quality",
                &fp,
            )),
        ),
        Submission::Attached(watch) => (
            StatusCode::ACCEPTED,
            Json(UploadResponse::new(
                "Your image is already queued for processing",
                watch.fingerprint(),
            )),
        ),
        Submission::Queued(watch) => (
            StatusCode::ACCEPTED,
            Json(UploadResponse::new(
                "Your image is queued for processing",
                watch.fingerprint(),
            )),
        ),
        Submission::Rejected(_) => return Err(RequestError::ShuttingDown),
    };

    Ok(response.into_response())
}

/// Handle artifact downloads.
///
/// # Endpoint
///
/// `GET /download/{md5}`
///
/// Serves the first artifact found for the digest (webp, then png, then jpg
/// by ascending quality) and records it for eviction.
pub async fn download_handler<C>(
    State(state): State<AppState<C>>,
    Path(md5): Path<String>,
) -> Result<Response, StoreError>
where
    C: ImageCodec + 'static,
{
    let downloaded = state.service.download(&md5).await?;
    let filename = downloaded
        .artifact
        .path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                downloaded.artifact.format.mime_type().to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", filename),
            ),
        ],
        downloaded.data,
    )
        .into_response())
}

/// List live tasks for a digest.
///
/// # Endpoint
///
/// `GET /queue/{md5}`
///
/// `404 Not Found` when nothing for this digest is queued or processing.
pub async fn queue_handler<C>(
    State(state): State<AppState<C>>,
    Path(md5): Path<String>,
) -> Response
where
    C: ImageCodec + 'static,
{
    let entries: Vec<QueueEntryResponse> = state
        .service
        .pending(&md5)
        .into_iter()
        .map(|entry| QueueEntryResponse {
            md5: entry.fingerprint.digest.to_hex(),
            filename: entry.filename,
            format: entry.fingerprint.format,
            quality: entry.fingerprint.quality,
        })
        .collect();

    if entries.is_empty() {
        return error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("MD5 not found in queue: {}", md5),
        );
    }
    Json(entries).into_response()
}

/// List the status of every task for a digest.
///
/// # Endpoint
///
/// `GET /status/{md5}`
///
/// `404 Not Found` when the digest was never submitted.
pub async fn status_handler<C>(
    State(state): State<AppState<C>>,
    Path(md5): Path<String>,
) -> Response
where
    C: ImageCodec + 'static,
{
    let entries: Vec<StatusEntryResponse> = state
        .service
        .statuses(&md5)
        .into_iter()
        .map(|entry| StatusEntryResponse {
            md5: entry.fingerprint.digest.to_hex(),
            status: entry.status,
            format: entry.fingerprint.format,
            quality: entry.fingerprint.quality,
        })
        .collect();

    if entries.is_empty() {
        return error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("MD5 not found: {}", md5),
        );
    }
    Json(entries).into_response()
}

/// Health check handler.
///
/// # Endpoint
///
/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
