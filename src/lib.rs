//! # imgshift
//!
//! An image conversion server with request deduplication.
//!
//! Clients upload images over HTTP or a WebSocket and ask for webp, png or
//! jpg output. Each request is identified by the MD5 of its bytes plus the
//! target format and quality; a given identity is converted at most once, even
//! when submitted concurrently.
//!
//! ## Features
//!
//! - **Deduplication**: identical in-flight submissions share one conversion,
//!   completed ones are answered without re-encoding
//! - **Bounded concurrency**: a fixed number of conversions run at once, the
//!   rest wait in FIFO order
//! - **Eviction**: downloaded artifacts are deleted in batches once enough
//!   downloads have been served
//! - **Two ingress paths**: multipart upload with polling, or a WebSocket
//!   with pushed progress
//!
//! ## Architecture
//!
//! - [`task`] - Fingerprints, task registry, bounded executor, conversion service
//! - [`codec`] - Image encoders for each output format
//! - [`store`] - Artifact files and served-artifact eviction
//! - [`server`] - Axum-based HTTP server, routes and WebSocket adapter
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use imgshift::{create_router, BoundedExecutor, ConversionService, OutputStore, RouterConfig, StandardCodec};
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = ConversionService::new(
//!         StandardCodec::new(),
//!         OutputStore::new("output"),
//!         BoundedExecutor::new(3),
//!     );
//!     let router = create_router(service, RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod server;
pub mod store;
pub mod task;

// Re-export commonly used types
pub use codec::{ImageCodec, JpegEncoder, PngQuantEncoder, StandardCodec, WebpEncoder};
pub use config::{parse_size, Config};
pub use error::{CodecError, RequestError, StoreError, TaskFailure};
pub use server::{
    create_router, health_handler, AppState, ErrorResponse, HealthResponse, ProgressMessage,
    RouterConfig, UploadMessage,
};
pub use store::{EvictionLedger, OutputStore, ResolvedArtifact, SweepReport};
pub use task::{
    BoundedExecutor, ContentDigest, ConversionRequest, ConversionService, Fingerprint,
    OutputFormat, Submission, TaskProgress, TaskRegistry, TaskStatus, TaskWatch,
};
