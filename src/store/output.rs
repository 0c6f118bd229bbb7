//! Filesystem store for converted artifacts.
//!
//! Artifacts live flat in one directory, named from their fingerprint:
//!
//! | Format | File name |
//! |--------|-----------|
//! | webp   | `{digest}.webp` |
//! | png    | `{digest}.png` |
//! | jpg    | `{digest}_{quality}.jpg` |
//!
//! Writes go to a hidden temporary file in the same directory and are renamed
//! into place, so a reader never observes a partially written artifact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::task::{ContentDigest, Fingerprint, OutputFormat, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY};

use super::eviction::EvictionLedger;

/// Default output directory, relative to the working directory.
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// An artifact located on disk by digest alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub path: PathBuf,
    pub format: OutputFormat,
    pub quality: u8,
}

/// Output directory plus the eviction ledger of served artifacts.
#[derive(Debug)]
pub struct OutputStore {
    dir: PathBuf,
    ledger: Arc<EvictionLedger>,
    temp_counter: AtomicU64,
}

impl OutputStore {
    /// Create a store rooted at `dir` with the default eviction threshold.
    ///
    /// The directory is not touched until [`ensure_dir`](Self::ensure_dir).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_ledger(dir, Arc::new(EvictionLedger::default()))
    }

    /// Create a store sharing an existing ledger.
    pub fn with_ledger(dir: impl Into<PathBuf>, ledger: Arc<EvictionLedger>) -> Self {
        Self {
            dir: dir.into(),
            ledger,
            temp_counter: AtomicU64::new(0),
        }
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ledger recording served artifacts.
    pub fn ledger(&self) -> &Arc<EvictionLedger> {
        &self.ledger
    }

    /// File name for a fingerprint's artifact.
    pub fn file_name(fingerprint: &Fingerprint) -> String {
        match fingerprint.format {
            OutputFormat::Jpg => format!("{}_{}.jpg", fingerprint.digest, fingerprint.quality),
            format => format!("{}.{}", fingerprint.digest, format.as_str()),
        }
    }

    /// Full path of a fingerprint's artifact.
    pub fn path_for(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(Self::file_name(fingerprint))
    }

    /// Create the output directory if it does not exist.
    pub async fn ensure_dir(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::DirectoryUnavailable {
                path: self.dir.clone(),
                message: e.to_string(),
            })
    }

    /// Persist an artifact, returning its final path.
    pub async fn write(&self, fingerprint: &Fingerprint, data: &[u8]) -> Result<PathBuf, StoreError> {
        let path = self.path_for(fingerprint);
        let temp = self.dir.join(format!(
            ".{}.{}.tmp",
            Self::file_name(fingerprint),
            self.temp_counter.fetch_add(1, Ordering::Relaxed)
        ));

        let write_failed = |e: std::io::Error| StoreError::WriteFailed {
            path: path.clone(),
            message: e.to_string(),
        };

        if let Err(e) = tokio::fs::write(&temp, data).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(write_failed(e));
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(write_failed(e));
        }

        debug!(path = %path.display(), bytes = data.len(), "Wrote artifact");
        Ok(path)
    }

    /// Read the artifact for an exact fingerprint, `None` if absent.
    pub async fn read(&self, fingerprint: &Fingerprint) -> Result<Option<Bytes>, StoreError> {
        read_optional(&self.path_for(fingerprint)).await
    }

    /// Read a file previously returned by [`resolve`](Self::resolve).
    pub async fn read_resolved(&self, artifact: &ResolvedArtifact) -> Result<Option<Bytes>, StoreError> {
        read_optional(&artifact.path).await
    }

    /// Find any artifact for a digest.
    ///
    /// Looks for webp, then png, then jpg at every quality from 1 to 100; the
    /// first existing file wins.
    pub async fn resolve(&self, digest: &ContentDigest) -> Result<ResolvedArtifact, StoreError> {
        let candidates = [OutputFormat::Webp, OutputFormat::Png]
            .into_iter()
            .map(|format| Fingerprint::from_digest(*digest, format, 0))
            .chain((MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).map(|quality| {
                Fingerprint::from_digest(*digest, OutputFormat::Jpg, i64::from(quality))
            }));

        for fingerprint in candidates {
            let path = self.path_for(&fingerprint);
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => {
                    return Ok(ResolvedArtifact {
                        path,
                        format: fingerprint.format,
                        quality: fingerprint.quality,
                    });
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to check artifact");
                }
            }
        }

        Err(StoreError::NotFound {
            digest: digest.to_hex(),
        })
    }

    /// Record a served artifact for later eviction.
    pub async fn record_served(&self, path: PathBuf) {
        self.ledger.record_served(path).await;
    }
}

async fn read_optional(path: &Path) -> Result<Option<Bytes>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(Bytes::from(data))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Io(format!("{}: {}", path.display(), e))),
    }
}

// =============================================================================
// Tests
// =============================================================================
