//! Register, dispatch and finalize conversions.
//!
//! [`ConversionService`] ties the registry, executor, codec and store together
//! and is the only thing the ingress adapters talk to.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::codec::ImageCodec;
use crate::error::{StoreError, TaskFailure};
use crate::store::{OutputStore, ResolvedArtifact};

use super::executor::BoundedExecutor;
use super::fingerprint::{ContentDigest, Fingerprint};
use super::registry::{PendingEntry, Registration, StatusEntry, TaskRegistry, TaskTicket, TaskWatch};

/// How often [`ConversionService::shutdown`] checks for remaining work.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A validated conversion request.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub fingerprint: Fingerprint,
    pub filename: String,
    pub data: Bytes,
}

impl ConversionRequest {
    /// Build a request for an already computed fingerprint.
    pub fn new(fingerprint: Fingerprint, filename: impl Into<String>, data: Bytes) -> Self {
        Self {
            fingerprint,
            filename: filename.into(),
            data,
        }
    }
}

/// What happened to a submitted request.
#[derive(Debug)]
pub enum Submission {
    /// The fingerprint completed before; nothing was dispatched.
    AlreadyCompleted(Fingerprint),

    /// An identical task was already queued or running.
    Attached(TaskWatch),

    /// A new task was queued.
    Queued(TaskWatch),

    /// The service is shutting down; nothing was recorded or dispatched.
    Rejected(Fingerprint),
}

/// An artifact located by digest and read from disk.
#[derive(Debug, Clone)]
pub struct DownloadedArtifact {
    pub artifact: ResolvedArtifact,
    pub data: Bytes,
}

/// Conversion pipeline shared by all adapters.
pub struct ConversionService<C> {
    registry: TaskRegistry,
    executor: BoundedExecutor,
    store: Arc<OutputStore>,
    codec: Arc<C>,
}

impl<C> Clone for ConversionService<C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            executor: self.executor.clone(),
            store: Arc::clone(&self.store),
            codec: Arc::clone(&self.codec),
        }
    }
}

impl<C: ImageCodec + 'static> ConversionService<C> {
    /// Create a service with a fresh registry.
    pub fn new(codec: C, store: OutputStore, executor: BoundedExecutor) -> Self {
        Self {
            registry: TaskRegistry::new(),
            executor,
            store: Arc::new(store),
            codec: Arc::new(codec),
        }
    }

    /// Task registry.
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Executor gating conversions.
    pub fn executor(&self) -> &BoundedExecutor {
        &self.executor
    }

    /// Artifact store.
    pub fn store(&self) -> &Arc<OutputStore> {
        &self.store
    }

    /// Submit a request, dispatching a conversion only for new work.
    pub fn submit(&self, request: ConversionRequest) -> Submission {
        let registration = self
            .registry
            .try_register(request.fingerprint, request.filename);
        self.handle_registration(request.fingerprint, registration, request.data)
    }

    /// Submit a request even if its fingerprint completed before.
    ///
    /// Used when the completed artifact is no longer on disk.
    pub fn reopen(&self, request: ConversionRequest) -> Submission {
        let registration = self.registry.reopen(request.fingerprint, request.filename);
        self.handle_registration(request.fingerprint, registration, request.data)
    }

    fn handle_registration(
        &self,
        fingerprint: Fingerprint,
        registration: Registration,
        data: Bytes,
    ) -> Submission {
        match registration {
            Registration::AlreadyCompleted => Submission::AlreadyCompleted(fingerprint),
            Registration::InFlight(watch) => Submission::Attached(watch),
            Registration::Registered(ticket) => {
                let watch = ticket.watch();
                self.dispatch(ticket, data);
                Submission::Queued(watch)
            }
            Registration::Closed => {
                debug!(task = %fingerprint, "Rejecting submission during shutdown");
                Submission::Rejected(fingerprint)
            }
        }
    }

    fn dispatch(&self, ticket: TaskTicket, data: Bytes) {
        info!(task = %ticket.fingerprint(), bytes = data.len(), "Queued conversion");
        let job = run_conversion(
            ticket,
            data,
            Arc::clone(&self.store),
            Arc::clone(&self.codec),
        );
        // The executor is only closed once the registry has drained, so every
        // dispatched job is admitted eventually.
        self.executor.spawn(job);
    }

    /// Read the stored artifact of an exact fingerprint.
    ///
    /// `None` means the artifact is not on disk (never written, or evicted).
    pub async fn fetch_artifact(&self, fingerprint: &Fingerprint) -> Option<Bytes> {
        match self.store.read(fingerprint).await {
            Ok(data) => data,
            Err(e) => {
                warn!(task = %fingerprint, error = %e, "Failed to read artifact");
                None
            }
        }
    }

    /// Locate and read any artifact for a hex digest, recording it as served.
    pub async fn download(&self, digest_hex: &str) -> Result<DownloadedArtifact, StoreError> {
        let not_found = || StoreError::NotFound {
            digest: digest_hex.to_string(),
        };
        let digest = ContentDigest::from_hex(digest_hex).ok_or_else(not_found)?;

        let artifact = self.store.resolve(&digest).await?;
        // Read before recording so a sweep cannot delete the file in between
        let data = self
            .store
            .read_resolved(&artifact)
            .await?
            .ok_or_else(not_found)?;
        self.store.record_served(artifact.path.clone()).await;

        debug!(path = %artifact.path.display(), bytes = data.len(), "Serving artifact");
        Ok(DownloadedArtifact { artifact, data })
    }

    /// Live tasks for a hex digest. Unparseable digests have none.
    pub fn pending(&self, digest_hex: &str) -> Vec<PendingEntry> {
        ContentDigest::from_hex(digest_hex)
            .map(|digest| self.registry.pending_by_digest(&digest))
            .unwrap_or_default()
    }

    /// Status of every task for a hex digest. Unparseable digests have none.
    pub fn statuses(&self, digest_hex: &str) -> Vec<StatusEntry> {
        ContentDigest::from_hex(digest_hex)
            .map(|digest| self.registry.status_by_digest(&digest))
            .unwrap_or_default()
    }

    /// Stop accepting conversions and wait for dispatched ones to finish.
    ///
    /// Submissions are rejected from the moment this is called. Tasks already
    /// queued or processing run to completion, after which the executor is
    /// closed. Returns `false` if `grace` elapsed first; the executor is then
    /// left open so no queued job is dropped.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.registry.close();
        info!(
            in_flight = self.registry.in_flight_count(),
            "No longer accepting conversions, draining"
        );

        let registry = self.registry.clone();
        let drained = tokio::time::timeout(grace, async move {
            while registry.in_flight_count() > 0 {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok();

        if drained {
            self.executor.close();
            info!("All conversions finished");
        } else {
            warn!(
                remaining = self.registry.in_flight_count(),
                "Shutdown grace period elapsed with conversions still running"
            );
        }
        drained
    }
}

/// Body of one dispatched conversion, run while holding an executor slot.
async fn run_conversion<C: ImageCodec>(
    ticket: TaskTicket,
    data: Bytes,
    store: Arc<OutputStore>,
    codec: Arc<C>,
) {
    let fingerprint = *ticket.fingerprint();
    ticket.mark_processing();
    debug!(task = %fingerprint, "Processing conversion");

    if let Err(e) = store.ensure_dir().await {
        error!(task = %fingerprint, error = %e, "Output directory unavailable");
        ticket.fail(TaskFailure::from(&e));
        return;
    }

    let artifact = match codec.encode(data, fingerprint.format, fingerprint.quality).await {
        Ok(artifact) => artifact,
        Err(e) => {
            error!(task = %fingerprint, error = %e, "Conversion failed");
            ticket.fail(TaskFailure::EncodingFailed);
            return;
        }
    };

    match store.write(&fingerprint, &artifact).await {
        Ok(path) => {
            info!(
                task = %fingerprint,
                path = %path.display(),
                bytes = artifact.len(),
                "Conversion complete"
            );
            ticket.complete(artifact);
        }
        Err(e) => {
            error!(task = %fingerprint, error = %e, "Failed to store artifact");
            ticket.fail(TaskFailure::from(&e));
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
