//! HTTP server layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │     POST /upload   GET /download|queue|status/{md5}   GET /ws   │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  handlers   │  │   socket    │  │        routes           │  │
//! │  │ (requests)  │  │ (websocket) │  │  (router config)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!                      ConversionService
//! ```

pub mod handlers;
pub mod routes;
pub mod socket;

pub use handlers::{
    download_handler, health_handler, queue_handler, status_handler, upload_handler, AppState,
    ErrorResponse, HealthResponse, QueueEntryResponse, StatusEntryResponse, UploadResponse,
    DEFAULT_MAX_UPLOAD_SIZE, PICTURE_FIELD,
};
pub use routes::{create_router, RouterConfig};
pub use socket::{handle_upload_message, ws_handler, ProgressMessage, UploadMessage};
