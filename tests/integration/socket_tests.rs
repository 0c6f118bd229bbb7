//! WebSocket message handling integration tests.
//!
//! Messages are driven through `handle_upload_message` with the progress
//! channel a connection would drain.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::time::Duration;
use tokio::sync::mpsc;

use imgshift::server::handle_upload_message;
use imgshift::{OutputFormat, ProgressMessage};

use super::test_utils::{md5_hex, MockCodec, TestApp, TestAppConfig};

const LIMIT: usize = 1024;

fn message(filename: &str, format: &str, data: &[u8], quality: i64) -> String {
    serde_json::json!({
        "filename": filename,
        "format": format,
        "data": STANDARD.encode(data),
        "quality": quality,
    })
    .to_string()
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<ProgressMessage>) -> ProgressMessage {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no progress message in time")
        .expect("channel closed")
}

/// Collect messages until a terminal one arrives.
async fn until_terminal(rx: &mut mpsc::UnboundedReceiver<ProgressMessage>) -> Vec<ProgressMessage> {
    let mut seen = Vec::new();
    loop {
        let msg = recv(rx).await;
        let terminal = !matches!(msg.status, "queued" | "processing");
        seen.push(msg);
        if terminal {
            return seen;
        }
    }
}

#[tokio::test]
async fn test_socket_upload_reports_progress_and_artifact() {
    let app = TestApp::with_codec(
        MockCodec::new().with_delay(Duration::from_millis(20)),
        TestAppConfig::default(),
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let data = b"socket image";

    handle_upload_message(&app.service, LIMIT, &message("a.png", "jpg", data, 55), &tx).await;

    let seen = until_terminal(&mut rx).await;
    assert_eq!(seen[0].status, "queued");
    assert_eq!(seen[0].md5.as_deref(), Some(md5_hex(data).as_str()));
    assert_eq!(seen[0].format, Some(OutputFormat::Jpg));
    assert_eq!(seen[0].quality, Some(55));

    let done = seen.last().unwrap();
    assert_eq!(done.status, "done");
    let file = STANDARD.decode(done.file.as_ref().unwrap()).unwrap();
    assert_eq!(file, MockCodec::expected_output(data, OutputFormat::Jpg, 55));
}

#[tokio::test]
async fn test_socket_png_omits_quality() {
    let app = TestApp::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    handle_upload_message(&app.service, LIMIT, &message("b.png", "png", b"png", 70), &tx).await;

    let seen = until_terminal(&mut rx).await;
    assert!(seen.iter().all(|m| m.quality.is_none()));
    let json = serde_json::to_value(seen.last().unwrap()).unwrap();
    assert!(json.get("quality").is_none());
    assert_eq!(json["format"], "png");
}

#[tokio::test]
async fn test_socket_rejections() {
    let app = TestApp::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    handle_upload_message(&app.service, LIMIT, "{not json", &tx).await;
    let msg = recv(&mut rx).await;
    assert_eq!(msg.status, "error");
    assert_eq!(msg.message, Some("invalid_json"));

    handle_upload_message(&app.service, LIMIT, &message("c", "tiff", b"x", 0), &tx).await;
    let msg = recv(&mut rx).await;
    assert_eq!(msg.status, "unsupported_format");
    assert_eq!(msg.message, Some("only webp/png/jpg supported"));

    let bad_base64 = serde_json::json!({"format": "webp", "data": "***"}).to_string();
    handle_upload_message(&app.service, LIMIT, &bad_base64, &tx).await;
    assert_eq!(recv(&mut rx).await.message, Some("invalid base64"));

    handle_upload_message(&app.service, LIMIT, &message("d", "webp", &[0u8; LIMIT + 1], 0), &tx)
        .await;
    assert_eq!(recv(&mut rx).await.message, Some("file too large"));

    assert!(rx.try_recv().is_err());
    assert_eq!(app.codec.call_count(), 0);
}

#[tokio::test]
async fn test_socket_completed_fingerprint_answers_immediately() {
    let app = TestApp::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let text = message("e.png", "webp", b"repeat", 0);

    handle_upload_message(&app.service, LIMIT, &text, &tx).await;
    until_terminal(&mut rx).await;

    handle_upload_message(&app.service, LIMIT, &text, &tx).await;
    let msg = recv(&mut rx).await;
    assert_eq!(msg.status, "done");
    assert!(msg.file.is_some());
    assert_eq!(app.codec.call_count(), 1);
}

#[tokio::test]
async fn test_socket_evicted_artifact_is_converted_again() {
    let app = TestApp::with_codec(
        MockCodec::new(),
        TestAppConfig {
            eviction_threshold: 1,
            ..TestAppConfig::default()
        },
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    let data = b"evict then reconnect";
    let text = message("f.png", "webp", data, 0);

    handle_upload_message(&app.service, LIMIT, &text, &tx).await;
    until_terminal(&mut rx).await;

    app.service.download(&md5_hex(data)).await.unwrap();
    assert_eq!(app.ledger.sweep().await.removed, 1);

    handle_upload_message(&app.service, LIMIT, &text, &tx).await;
    let seen = until_terminal(&mut rx).await;
    assert_eq!(seen[0].status, "queued");
    assert_eq!(seen.last().unwrap().status, "done");
    assert_eq!(app.codec.call_count(), 2);
}

#[tokio::test]
async fn test_socket_failure_is_reported() {
    let app = TestApp::with_codec(MockCodec::new().failing(), TestAppConfig::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    handle_upload_message(&app.service, LIMIT, &message("g", "webp", b"bad", 0), &tx).await;

    let last = until_terminal(&mut rx).await.pop().unwrap();
    assert_eq!(last.status, "error");
    assert_eq!(last.md5.as_deref(), Some(md5_hex(b"bad").as_str()));
    assert_eq!(last.message, Some("processing_failed"));
}

#[tokio::test]
async fn test_socket_multiple_uploads_on_one_connection() {
    let app = TestApp::with_codec(
        MockCodec::new().with_delay(Duration::from_millis(30)),
        TestAppConfig::default(),
    );
    let (tx, mut rx) = mpsc::unbounded_channel();

    for i in 0..3u8 {
        let text = message("multi", "webp", &[i; 8], 0);
        handle_upload_message(&app.service, LIMIT, &text, &tx).await;
    }

    let mut done = std::collections::HashSet::new();
    while done.len() < 3 {
        let msg = recv(&mut rx).await;
        if msg.status == "done" {
            done.insert(msg.md5.unwrap());
        }
    }
    for i in 0..3u8 {
        assert!(done.contains(&md5_hex(&[i; 8])));
    }
}
