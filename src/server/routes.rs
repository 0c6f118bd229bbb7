//! Router configuration.
//!
//! This module defines the HTTP routes and applies middleware for CORS, body
//! limits and request tracing.
//!
//! # Route Structure
//!
//! ```text
//! /health             - Health check
//! /upload             - Multipart image upload (POST)
//! /download/{md5}     - Converted artifact
//! /queue/{md5}        - Live tasks for a digest
//! /status/{md5}       - Task statuses for a digest
//! /ws                 - WebSocket upload channel
//! ```
//!
//! # Example
//!
//! ```ignore
//! use imgshift::codec::StandardCodec;
//! use imgshift::server::{create_router, RouterConfig};
//! use imgshift::store::OutputStore;
//! use imgshift::task::{BoundedExecutor, ConversionService};
//!
//! let service = ConversionService::new(
//!     StandardCodec::new(),
//!     OutputStore::new("output"),
//!     BoundedExecutor::new(3),
//! );
//! let router = create_router(service, RouterConfig::new());
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    download_handler, health_handler, queue_handler, status_handler, upload_handler, AppState,
    DEFAULT_MAX_UPLOAD_SIZE,
};
use super::socket::ws_handler;
use crate::codec::ImageCodec;
use crate::task::ConversionService;

/// Room for multipart boundaries and the small text fields.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Largest accepted image in bytes
    pub max_upload_size: usize,

    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    /// Create a new router configuration.
    ///
    /// By default:
    /// - Uploads are limited to 10 MiB
    /// - CORS allows any origin
    /// - Tracing is enabled
    pub fn new() -> Self {
        Self {
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            cors_origins: None,
            enable_tracing: true,
        }
    }

    /// Set the upload ceiling in bytes.
    pub fn with_max_upload_size(mut self, bytes: usize) -> Self {
        self.max_upload_size = bytes;
        self
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
pub fn create_router<C>(service: ConversionService<C>, config: RouterConfig) -> Router
where
    C: ImageCodec + 'static,
{
    let app_state = AppState::new(service).with_max_upload_size(config.max_upload_size);
    let cors = build_cors_layer(&config);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route(
            "/upload",
            post(upload_handler::<C>).layer(DefaultBodyLimit::max(
                config.max_upload_size.saturating_add(MULTIPART_OVERHEAD),
            )),
        )
        .route("/download/{md5}", get(download_handler::<C>))
        .route("/queue/{md5}", get(queue_handler::<C>))
        .route("/status/{md5}", get(status_handler::<C>))
        .route("/ws", get(ws_handler::<C>))
        .with_state(app_state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
