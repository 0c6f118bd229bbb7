//! Upload endpoint integration tests.
//!
//! Tests verify:
//! - Response codes for new, in-flight and completed fingerprints
//! - Format and quality normalization
//! - Request validation (missing file, unsupported format, size limit)
//! - Refusal of new uploads once shutdown has begun

use axum::http::StatusCode;
use std::time::Duration;

use imgshift::OutputFormat;

use super::test_utils::{
    body_json, md5_hex, upload, upload_request, MockCodec, Part, TestApp, TestAppConfig,
};

// =============================================================================
// Accepted Uploads
// =============================================================================

#[tokio::test]
async fn test_upload_queues_new_task() {
    let app = TestApp::new();
    let data = b"fresh image bytes";

    let response = app.send(upload(data, None, None)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json = body_json(response).await;
    assert_eq!(json["message"], "Your image is queued for processing");
    assert_eq!(json["md5"], md5_hex(data));
    assert_eq!(json["format"], "webp");
    assert_eq!(json["quality"], 0);

    app.wait_idle().await;
    assert_eq!(app.codec.call_count(), 1);
}

#[tokio::test]
async fn test_jpeg_alias_with_out_of_range_quality() {
    let app = TestApp::new();

    let response = app.send(upload(b"photo", Some("jpeg"), Some("150"))).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json = body_json(response).await;
    assert_eq!(json["format"], "jpg");
    assert_eq!(json["quality"], 80);

    app.wait_idle().await;
    assert!(app.output_dir().join(format!("{}_80.jpg", md5_hex(b"photo"))).is_file());
}

#[tokio::test]
async fn test_format_is_case_folded_and_trimmed() {
    let app = TestApp::new();

    let response = app.send(upload(b"img", Some("  PNG "), None)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["format"], "png");
}

#[tokio::test]
async fn test_unparseable_quality_uses_default() {
    let app = TestApp::new();

    let response = app.send(upload(b"img", Some("jpg"), Some("high"))).await;
    assert_eq!(body_json(response).await["quality"], 80);
}

#[tokio::test]
async fn test_sequential_png_upload_already_processed() {
    let app = TestApp::new();
    let data = b"png source";

    let first = app.send(upload(data, Some("png"), None)).await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    app.wait_idle().await;

    let second = app.send(upload(data, Some("png"), Some("42"))).await;
    assert_eq!(second.status(), StatusCode::OK);

    let json = body_json(second).await;
    assert_eq!(json["message"], "Image already processed for this format/quality");
    assert_eq!(json["md5"], md5_hex(data));
    assert_eq!(json["quality"], 0);
    assert_eq!(app.codec.call_count(), 1);
}

#[tokio::test]
async fn test_different_jpeg_qualities_are_distinct_tasks() {
    let app = TestApp::new();
    let data = b"jpeg source";

    app.send(upload(data, Some("jpg"), Some("30"))).await;
    app.send(upload(data, Some("jpg"), Some("90"))).await;
    app.wait_idle().await;

    assert_eq!(app.codec.call_count(), 2);
    let statuses = app.service.statuses(&md5_hex(data));
    let qualities: Vec<u8> = statuses.iter().map(|s| s.fingerprint.quality).collect();
    assert_eq!(qualities, vec![30, 90]);
    assert!(statuses.iter().all(|s| s.fingerprint.format == OutputFormat::Jpg));
}

#[tokio::test]
async fn test_upload_while_in_flight_is_attached() {
    let app = TestApp::with_codec(
        MockCodec::new().with_delay(Duration::from_millis(200)),
        TestAppConfig::default(),
    );
    let data = b"slow image";

    let first = app.send(upload(data, Some("webp"), None)).await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = app.send(upload(data, Some("webp"), None)).await;
    assert_eq!(second.status(), StatusCode::ACCEPTED);
    assert_eq!(
        body_json(second).await["message"],
        "Your image is already queued for processing"
    );

    app.wait_idle().await;
    assert_eq!(app.codec.call_count(), 1);
}

// =============================================================================
// Validation Errors
// =============================================================================

#[tokio::test]
async fn test_unsupported_format_rejected() {
    let app = TestApp::new();
    let data = b"gif please";

    let response = app.send(upload(data, Some("gif"), None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"], "unsupported_format");
    assert_eq!(json["status"], 400);

    // No task record was created
    let status = app.get(&format!("/status/{}", md5_hex(data))).await;
    assert_eq!(status.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.codec.call_count(), 0);
}

#[tokio::test]
async fn test_missing_picture_rejected() {
    let app = TestApp::new();

    let response = app
        .send(upload_request(&[Part::Text {
            name: "format",
            value: "webp",
        }]))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "missing_file");
}

#[tokio::test]
async fn test_oversized_picture_rejected() {
    let app = TestApp::with_codec(
        MockCodec::new(),
        TestAppConfig {
            max_upload_size: 16,
            ..TestAppConfig::default()
        },
    );
    let data = vec![7u8; 17];

    let response = app.send(upload(&data, None, None)).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["error"], "payload_too_large");
    assert_eq!(app.service.registry().in_flight_count(), 0);

    // Exactly at the limit is fine
    let response = app.send(upload(&data[..16], None, None)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_body_far_over_limit_rejected() {
    let app = TestApp::with_codec(
        MockCodec::new(),
        TestAppConfig {
            max_upload_size: 1024,
            ..TestAppConfig::default()
        },
    );
    let data = vec![1u8; 256 * 1024];

    let response = app.send(upload(&data, None, None)).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.codec.call_count(), 0);
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_finishes_accepted_work_and_refuses_new_uploads() {
    let app = TestApp::with_codec(
        MockCodec::new().with_delay(Duration::from_millis(30)),
        TestAppConfig {
            max_concurrent_tasks: 1,
            ..TestAppConfig::default()
        },
    );
    let first = b"accepted first";
    let second = b"accepted second";

    assert_eq!(
        app.send(upload(first, None, None)).await.status(),
        StatusCode::ACCEPTED
    );
    assert_eq!(
        app.send(upload(second, None, None)).await.status(),
        StatusCode::ACCEPTED
    );

    assert!(app.service.shutdown(Duration::from_secs(5)).await);

    // Both were admitted before shutdown, so both completed
    for data in [&first[..], &second[..]] {
        let json = body_json(app.get(&format!("/status/{}", md5_hex(data))).await).await;
        assert_eq!(json[0]["status"], "done");
    }

    let late = b"arrived late";
    let response = app.send(upload(late, None, None)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error"], "service_unavailable");
    assert_eq!(
        app.get(&format!("/status/{}", md5_hex(late))).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(app.codec.call_count(), 2);
}
