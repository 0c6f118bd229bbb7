//! End-to-end tests with the real image encoders.
//!
//! PNG output shells out to pngquant; a shell script stands in for it so the
//! tests do not depend on it being installed.

use axum::http::StatusCode;

use imgshift::StandardCodec;

use super::test_utils::{
    body_bytes, body_json, create_test_png, is_valid_jpeg, is_valid_webp, md5_hex, upload,
    TestApp, TestAppConfig,
};

#[tokio::test]
async fn test_png_to_webp_roundtrip() {
    let app = TestApp::with_codec(StandardCodec::new(), TestAppConfig::default());
    let source = create_test_png(32, 24);

    let response = app.send(upload(&source, Some("webp"), None)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    app.wait_idle().await;

    let response = app.get(&format!("/download/{}", md5_hex(&source))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_bytes(response).await;
    assert!(is_valid_webp(&body));

    let decoded = image::load_from_memory(&body).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (32, 24));
}

#[tokio::test]
async fn test_png_to_jpeg_roundtrip() {
    let app = TestApp::with_codec(StandardCodec::new(), TestAppConfig::default());
    let source = create_test_png(20, 20);

    app.send(upload(&source, Some("jpg"), Some("40"))).await;
    app.wait_idle().await;

    let response = app.get(&format!("/download/{}", md5_hex(&source))).await;
    assert_eq!(response.headers().get("content-type").unwrap(), "image/jpeg");
    assert!(is_valid_jpeg(&body_bytes(response).await));
    assert!(app
        .output_dir()
        .join(format!("{}_40.jpg", md5_hex(&source)))
        .is_file());
}

#[tokio::test]
async fn test_undecodable_upload_fails_task() {
    let app = TestApp::with_codec(StandardCodec::new(), TestAppConfig::default());
    let garbage = b"definitely not an image";

    let response = app.send(upload(garbage, Some("webp"), None)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    app.wait_idle().await;

    let json = body_json(app.get(&format!("/status/{}", md5_hex(garbage))).await).await;
    assert_eq!(json[0]["status"], "failed");

    let response = app.get(&format!("/download/{}", md5_hex(garbage))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_optimizer_fails_png_task() {
    let app = TestApp::with_codec(
        StandardCodec::with_pngquant("/nonexistent/pngquant-binary"),
        TestAppConfig::default(),
    );
    let source = create_test_png(8, 8);

    app.send(upload(&source, Some("png"), None)).await;
    app.wait_idle().await;

    let json = body_json(app.get(&format!("/status/{}", md5_hex(&source))).await).await;
    assert_eq!(json[0]["status"], "failed");
}

/// Write an executable script to use as the pngquant binary.
#[cfg(unix)]
fn pngquant_stub(dir: &std::path::Path, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("pngquant");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

#[cfg(unix)]
#[tokio::test]
async fn test_png_conversion_through_optimizer() {
    let bin = tempfile::TempDir::new().unwrap();
    let app = TestApp::with_codec(
        StandardCodec::with_pngquant(pngquant_stub(bin.path(), "cat")),
        TestAppConfig::default(),
    );
    let source = create_test_png(12, 9);

    let response = app.send(upload(&source, Some("png"), None)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    app.wait_idle().await;

    let json = body_json(app.get(&format!("/status/{}", md5_hex(&source))).await).await;
    assert_eq!(json[0]["status"], "done");

    let response = app.get(&format!("/download/{}", md5_hex(&source))).await;
    assert_eq!(response.headers().get("content-type").unwrap(), "image/png");
    let decoded = image::load_from_memory(&body_bytes(response).await).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (12, 9));
}

#[cfg(unix)]
#[tokio::test]
async fn test_optimizer_nonzero_exit_fails_task() {
    let bin = tempfile::TempDir::new().unwrap();
    let app = TestApp::with_codec(
        StandardCodec::with_pngquant(pngquant_stub(bin.path(), "exit 99")),
        TestAppConfig::default(),
    );
    let source = create_test_png(6, 6);

    app.send(upload(&source, Some("png"), None)).await;
    app.wait_idle().await;

    let json = body_json(app.get(&format!("/status/{}", md5_hex(&source))).await).await;
    assert_eq!(json[0]["status"], "failed");
    assert_eq!(
        app.get(&format!("/download/{}", md5_hex(&source))).await.status(),
        StatusCode::NOT_FOUND
    );
}
