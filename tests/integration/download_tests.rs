//! Download and eviction integration tests.

use axum::http::StatusCode;

use imgshift::OutputFormat;

use super::test_utils::{
    artifact_exists, body_bytes, body_json, md5_hex, upload, MockCodec, TestApp, TestAppConfig,
};

#[tokio::test]
async fn test_download_converted_artifact() {
    let app = TestApp::new();
    let data = b"download me";

    app.send(upload(data, Some("webp"), None)).await;
    app.wait_idle().await;

    let response = app.get(&format!("/download/{}", md5_hex(data))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/webp");

    let body = body_bytes(response).await;
    assert_eq!(
        body.as_ref(),
        MockCodec::expected_output(data, OutputFormat::Webp, 0).as_slice()
    );
}

#[tokio::test]
async fn test_download_jpeg_artifact() {
    let app = TestApp::new();
    let data = b"jpeg me";

    app.send(upload(data, Some("jpg"), Some("65"))).await;
    app.wait_idle().await;

    let response = app.get(&format!("/download/{}", md5_hex(data))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/jpeg");
    assert_eq!(
        body_bytes(response).await.as_ref(),
        MockCodec::expected_output(data, OutputFormat::Jpg, 65).as_slice()
    );
}

#[tokio::test]
async fn test_download_prefers_webp_over_jpeg() {
    let app = TestApp::new();
    let data = b"both formats";

    app.send(upload(data, Some("jpg"), Some("50"))).await;
    app.send(upload(data, Some("webp"), None)).await;
    app.wait_idle().await;

    let response = app.get(&format!("/download/{}", md5_hex(data))).await;
    assert_eq!(response.headers().get("content-type").unwrap(), "image/webp");
}

#[tokio::test]
async fn test_download_unknown_digest() {
    let app = TestApp::new();

    let response = app.get(&format!("/download/{}", md5_hex(b"never uploaded"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "not_found");
}

#[tokio::test]
async fn test_download_malformed_digest() {
    let app = TestApp::new();

    let response = app.get("/download/not-hex").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get("/download/..%2F..%2Fetc%2Fpasswd").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_downloads_are_recorded_for_eviction() {
    let app = TestApp::new();
    let data = b"counted";

    app.send(upload(data, None, None)).await;
    app.wait_idle().await;

    for _ in 0..3 {
        let response = app.get(&format!("/download/{}", md5_hex(data))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(app.ledger.served_count().await, 3);

    // Below the threshold nothing is removed
    assert!(!app.ledger.sweep().await.swept);
    assert!(artifact_exists(
        &app.output_dir(),
        &format!("{}.webp", md5_hex(data))
    ));
}

#[tokio::test]
async fn test_sweep_after_threshold_evicts_served_artifacts() {
    let app = TestApp::with_codec(
        MockCodec::new(),
        TestAppConfig {
            eviction_threshold: 2,
            ..TestAppConfig::default()
        },
    );
    let served = b"served twice";
    let unserved = b"never downloaded";

    app.send(upload(served, None, None)).await;
    app.send(upload(unserved, None, None)).await;
    app.wait_idle().await;

    let uri = format!("/download/{}", md5_hex(served));
    assert_eq!(app.get(&uri).await.status(), StatusCode::OK);
    assert_eq!(app.get(&uri).await.status(), StatusCode::OK);

    let report = app.ledger.sweep().await;
    assert!(report.swept);
    assert_eq!(report.removed, 1);
    assert_eq!(app.ledger.served_count().await, 0);

    assert_eq!(app.get(&uri).await.status(), StatusCode::NOT_FOUND);
    assert!(artifact_exists(
        &app.output_dir(),
        &format!("{}.webp", md5_hex(unserved))
    ));
}

#[tokio::test]
async fn test_evicted_upload_still_reports_processed() {
    let app = TestApp::with_codec(
        MockCodec::new(),
        TestAppConfig {
            eviction_threshold: 1,
            ..TestAppConfig::default()
        },
    );
    let data = b"evicted";

    app.send(upload(data, Some("png"), None)).await;
    app.wait_idle().await;
    app.get(&format!("/download/{}", md5_hex(data))).await;
    app.ledger.sweep().await;

    // The completed marker is sticky even though the file is gone
    let response = app.send(upload(data, Some("png"), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.codec.call_count(), 1);
}
