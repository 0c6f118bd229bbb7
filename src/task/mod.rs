//! Conversion task lifecycle.
//!
//! This module is the core of the server: it decides whether a conversion
//! needs to run at all, runs it under a global concurrency cap, and records
//! its outcome.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐  bytes, format, quality
//!  │   Adapter    │──────────────────────────┐
//!  └──────────────┘                          ▼
//!                                   ┌─────────────────┐
//!                                   │   Fingerprint   │  (md5, format, quality)
//!                                   └────────┬────────┘
//!                                            ▼
//!  ┌──────────────────────────────────────────────────────────────┐
//!  │                      ConversionService                       │
//!  │  ┌──────────────┐   ticket   ┌─────────────────┐             │
//!  │  │ TaskRegistry │───────────►│ BoundedExecutor │             │
//!  │  └──────┬───────┘            └────────┬────────┘             │
//!  │         │ watch                       │ encode, write        │
//!  │         ▼                             ▼                      │
//!  │  observers (queued,       ┌────────────┐   ┌─────────────┐   │
//!  │  processing, done/failed) │ ImageCodec │   │ OutputStore │   │
//!  │                           └────────────┘   └─────────────┘   │
//!  └──────────────────────────────────────────────────────────────┘
//! ```

mod executor;
mod fingerprint;
mod registry;
mod service;

pub use executor::{BoundedExecutor, ExecutorClosed, ExecutorSlot, DEFAULT_MAX_CONCURRENT_TASKS};
pub use fingerprint::{
    ContentDigest, Fingerprint, OutputFormat, DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY,
    MIN_JPEG_QUALITY,
};
pub use registry::{
    PendingEntry, Registration, StatusEntry, TaskProgress, TaskRegistry, TaskStatus, TaskTicket,
    TaskWatch,
};
pub use service::{ConversionRequest, ConversionService, DownloadedArtifact, Submission};
