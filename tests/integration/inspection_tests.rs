//! Queue, status and health endpoint integration tests.

use axum::http::StatusCode;
use std::time::Duration;

use super::test_utils::{body_json, md5_hex, upload, MockCodec, TestApp, TestAppConfig};

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new();

    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_queue_lists_live_tasks_only() {
    let app = TestApp::with_codec(
        MockCodec::new().with_delay(Duration::from_millis(150)),
        TestAppConfig::default(),
    );
    let data = b"queued image";

    app.send(upload(data, Some("jpg"), Some("70"))).await;

    let response = app.get(&format!("/queue/{}", md5_hex(data))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["md5"], md5_hex(data));
    assert_eq!(entries[0]["filename"], "photo.png");
    assert_eq!(entries[0]["format"], "jpg");
    assert_eq!(entries[0]["quality"], 70);

    app.wait_idle().await;

    let response = app.get(&format!("/queue/{}", md5_hex(data))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status_tracks_lifecycle() {
    let app = TestApp::with_codec(
        MockCodec::new().with_delay(Duration::from_millis(150)),
        TestAppConfig::default(),
    );
    let data = b"lifecycle";
    let uri = format!("/status/{}", md5_hex(data));

    app.send(upload(data, Some("png"), None)).await;

    let json = body_json(app.get(&uri).await).await;
    let status = json[0]["status"].as_str().unwrap().to_string();
    assert!(status == "queued" || status == "processing", "got {}", status);

    app.wait_idle().await;

    let json = body_json(app.get(&uri).await).await;
    assert_eq!(json[0]["status"], "done");
    assert_eq!(json[0]["format"], "png");
    assert_eq!(json[0]["quality"], 0);
}

#[tokio::test]
async fn test_status_reports_failure_and_keeps_entry() {
    let app = TestApp::with_codec(MockCodec::new().failing(), TestAppConfig::default());
    let data = b"broken";

    app.send(upload(data, None, None)).await;
    app.wait_idle().await;

    let response = app.get(&format!("/status/{}", md5_hex(data))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await[0]["status"], "failed");

    // Failed tasks leave the queue
    let response = app.get(&format!("/queue/{}", md5_hex(data))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // and a resubmission runs again
    let response = app.send(upload(data, None, None)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    app.wait_idle().await;
    assert_eq!(app.codec.call_count(), 2);
}

#[tokio::test]
async fn test_status_lists_every_variant_of_a_digest() {
    let app = TestApp::new();
    let data = b"variants";

    app.send(upload(data, Some("webp"), None)).await;
    app.send(upload(data, Some("png"), None)).await;
    app.send(upload(data, Some("jpg"), Some("10"))).await;
    app.wait_idle().await;

    let json = body_json(app.get(&format!("/status/{}", md5_hex(data))).await).await;
    let formats: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["format"].as_str().unwrap())
        .collect();
    assert_eq!(formats, vec!["webp", "png", "jpg"]);
}

#[tokio::test]
async fn test_unknown_digest_not_found() {
    let app = TestApp::new();

    for uri in ["/status/00000000000000000000000000000000", "/queue/xyz"] {
        let response = app.get(uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "not_found");
    }
}
