//! WebSocket upload adapter.
//!
//! Clients send one JSON message per image and receive progress messages for
//! each conversion on the same socket:
//!
//! ```text
//!  client                                   server
//!    │  {filename, format, data, quality}     │
//!    │ ─────────────────────────────────────► │
//!    │         {status: "queued", md5, ...}   │
//!    │ ◄───────────────────────────────────── │
//!    │     {status: "processing", md5, ...}   │
//!    │ ◄───────────────────────────────────── │
//!    │  {status: "done", md5, file, ...}      │
//!    │ ◄───────────────────────────────────── │
//! ```
//!
//! Several conversions may be in flight per connection. Their updates are
//! funneled through one channel drained by the connection task, which is the
//! only writer on the socket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::codec::ImageCodec;
use crate::error::TaskFailure;
use crate::task::{
    ConversionRequest, ConversionService, Fingerprint, OutputFormat, Submission, TaskProgress,
    TaskWatch,
};

use super::handlers::AppState;

/// Headroom for the JSON envelope around the base64 payload.
const MESSAGE_OVERHEAD: usize = 64 * 1024;

// =============================================================================
// Wire Types
// =============================================================================

/// Inbound conversion request.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadMessage {
    #[serde(default)]
    pub filename: String,

    #[serde(default)]
    pub format: String,

    /// Base64 (standard alphabet) image bytes
    #[serde(default)]
    pub data: String,

    #[serde(default)]
    pub quality: i64,
}

/// Outbound progress or error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressMessage {
    pub status: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,

    /// Base64 artifact, only on `done`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,

    /// Omitted for formats without a quality setting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
}

impl ProgressMessage {
    fn rejection(status: &'static str, message: &'static str) -> Self {
        Self {
            status,
            md5: None,
            message: Some(message),
            file: None,
            format: None,
            quality: None,
        }
    }

    fn for_task(status: &'static str, fingerprint: &Fingerprint) -> Self {
        Self {
            status,
            md5: Some(fingerprint.digest.to_hex()),
            message: None,
            file: None,
            format: Some(fingerprint.format),
            quality: (fingerprint.quality > 0).then_some(fingerprint.quality),
        }
    }

    pub fn invalid_json() -> Self {
        Self::rejection("error", "invalid_json")
    }

    pub fn unsupported_format() -> Self {
        Self::rejection("unsupported_format", "only webp/png/jpg supported")
    }

    pub fn decode_error() -> Self {
        Self::rejection("decode_error", "invalid base64")
    }

    pub fn size_exceeded() -> Self {
        Self::rejection("size_exceeded", "file too large")
    }

    pub fn shutting_down() -> Self {
        Self::rejection("error", "shutting_down")
    }

    pub fn queued(fingerprint: &Fingerprint) -> Self {
        Self::for_task("queued", fingerprint)
    }

    pub fn processing(fingerprint: &Fingerprint) -> Self {
        Self::for_task("processing", fingerprint)
    }

    pub fn done(fingerprint: &Fingerprint, artifact: &[u8]) -> Self {
        Self {
            file: Some(STANDARD.encode(artifact)),
            ..Self::for_task("done", fingerprint)
        }
    }

    /// Job failure, reported by stage.
    pub fn failed(fingerprint: &Fingerprint, failure: TaskFailure) -> Self {
        let message = match failure {
            TaskFailure::DirectoryUnavailable => "mkdir_failed",
            TaskFailure::EncodingFailed | TaskFailure::Aborted => "processing_failed",
            TaskFailure::StorageWriteFailed => "save_failed",
        };
        Self {
            status: "error",
            md5: Some(fingerprint.digest.to_hex()),
            message: Some(message),
            file: None,
            format: None,
            quality: None,
        }
    }
}

// =============================================================================
// Connection Handling
// =============================================================================

/// Upgrade `GET /ws` to a WebSocket connection.
pub async fn ws_handler<C>(ws: WebSocketUpgrade, State(state): State<AppState<C>>) -> Response
where
    C: ImageCodec + 'static,
{
    let max_message_size = max_message_size(state.max_upload_size);
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Largest text frame accepted for an upload of `max_upload_size` bytes.
fn max_message_size(max_upload_size: usize) -> usize {
    // base64 inflates by 4/3
    (max_upload_size / 3)
        .saturating_add(1)
        .saturating_mul(4)
        .saturating_add(MESSAGE_OVERHEAD)
}

async fn handle_socket<C>(mut socket: WebSocket, state: AppState<C>)
where
    C: ImageCodec + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressMessage>();
    debug!("WebSocket connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_upload_message(&state.service, state.max_upload_size, text.as_str(), &tx)
                        .await;
                }
                Some(Ok(Message::Binary(payload))) => match std::str::from_utf8(&payload) {
                    Ok(text) => {
                        handle_upload_message(&state.service, state.max_upload_size, text, &tx)
                            .await;
                    }
                    Err(_) => {
                        let _ = tx.send(ProgressMessage::invalid_json());
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket receive failed");
                    break;
                }
            },
            Some(outgoing) = rx.recv() => {
                if let Err(e) = send_message(&mut socket, &outgoing).await {
                    debug!(error = %e, "WebSocket send failed");
                    break;
                }
            }
        }
    }

    // Dispatched conversions keep running; their updates are discarded
    debug!("WebSocket disconnected");
}

async fn send_message(socket: &mut WebSocket, message: &ProgressMessage) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to serialize progress message");
            return Ok(());
        }
    };
    socket.send(Message::Text(json.into())).await
}

/// Validate one inbound message and submit it.
///
/// Replies are queued on `tx`; progress of the resulting task is forwarded by
/// a background task until it reaches a terminal state.
pub async fn handle_upload_message<C>(
    service: &ConversionService<C>,
    max_upload_size: usize,
    text: &str,
    tx: &mpsc::UnboundedSender<ProgressMessage>,
) where
    C: ImageCodec + 'static,
{
    let upload: UploadMessage = match serde_json::from_str(text) {
        Ok(upload) => upload,
        Err(e) => {
            debug!(error = %e, "Rejecting malformed socket message");
            let _ = tx.send(ProgressMessage::invalid_json());
            return;
        }
    };

    let format = match OutputFormat::parse(&upload.format) {
        Ok(format) => format,
        Err(_) => {
            let _ = tx.send(ProgressMessage::unsupported_format());
            return;
        }
    };

    let data = match STANDARD.decode(upload.data.as_bytes()) {
        Ok(data) => data,
        Err(_) => {
            let _ = tx.send(ProgressMessage::decode_error());
            return;
        }
    };
    if data.len() > max_upload_size {
        let _ = tx.send(ProgressMessage::size_exceeded());
        return;
    }

    let fingerprint = Fingerprint::new(&data, format, upload.quality);
    info!(task = %fingerprint, filename = %upload.filename, bytes = data.len(), "Socket upload received");
    let request = ConversionRequest::new(fingerprint, upload.filename, Bytes::from(data));

    let watch = match service.submit(request.clone()) {
        Submission::Queued(watch) | Submission::Attached(watch) => watch,
        Submission::Rejected(_) => {
            let _ = tx.send(ProgressMessage::shutting_down());
            return;
        }
        Submission::AlreadyCompleted(fp) => {
            if let Some(artifact) = service.fetch_artifact(&fp).await {
                let _ = tx.send(ProgressMessage::done(&fp, &artifact));
                return;
            }
            debug!(task = %fp, "Completed artifact evicted, converting again");
            match service.reopen(request) {
                Submission::Queued(watch) | Submission::Attached(watch) => watch,
                Submission::Rejected(_) => {
                    let _ = tx.send(ProgressMessage::shutting_down());
                    return;
                }
                // Reopening never reports completion
                Submission::AlreadyCompleted(_) => return,
            }
        }
    };

    let _ = tx.send(ProgressMessage::queued(&fingerprint));
    tokio::spawn(forward_progress(watch, tx.clone()));
}

/// Relay a task's remaining transitions to a connection.
async fn forward_progress(mut watch: TaskWatch, tx: mpsc::UnboundedSender<ProgressMessage>) {
    let fingerprint = *watch.fingerprint();
    while let Some(progress) = watch.next().await {
        let message = match &progress {
            TaskProgress::Queued => continue,
            TaskProgress::Processing => ProgressMessage::processing(&fingerprint),
            TaskProgress::Done { artifact } => ProgressMessage::done(&fingerprint, artifact),
            TaskProgress::Failed { failure } => ProgressMessage::failed(&fingerprint, *failure),
        };
        if tx.send(message).is_err() {
            // Connection gone
            return;
        }
        if progress.is_terminal() {
            return;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
