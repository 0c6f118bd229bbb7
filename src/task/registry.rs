//! Deduplicating task registry.
//!
//! The registry is the source of truth for every conversion task seen by this
//! process. It maps a [`Fingerprint`] to:
//!
//! - the advisory source filename while the task is live,
//! - the task's lifecycle [`TaskStatus`],
//! - a sticky "completed" marker once the task has ever reached `Done`,
//! - a progress channel observers can subscribe to while the task is live.
//!
//! All four live behind a single mutex. Per-key locking would reopen the race
//! between "is this fingerprint known?" and "record it as queued", so the
//! check-and-insert in [`TaskRegistry::try_register`] is one critical section.
//!
//! # Lifecycle
//!
//! ```text
//!   try_register ──► Queued ──► Processing ──► Done    (sticky)
//!                                         └──► Failed  (resubmission re-runs)
//! ```
//!
//! Only the holder of the [`TaskTicket`] returned on registration can move a
//! task along. Dropping an unfinished ticket finalizes the task as failed, so a
//! panicking job can never leave a fingerprint stuck in `Processing`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::TaskFailure;

use super::fingerprint::{ContentDigest, Fingerprint};

// =============================================================================
// Status Types
// =============================================================================

/// Lifecycle status of a task, as reported by inspection endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl TaskStatus {
    /// Wire name of the status.
    pub const fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    /// Whether no further transition can happen.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

/// Progress event published to observers of a live task.
///
/// Terminal events carry the outcome so observers need not go back to storage.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskProgress {
    Queued,
    Processing,
    Done { artifact: Bytes },
    Failed { failure: TaskFailure },
}

impl TaskProgress {
    /// Status corresponding to this event.
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskProgress::Queued => TaskStatus::Queued,
            TaskProgress::Processing => TaskStatus::Processing,
            TaskProgress::Done { .. } => TaskStatus::Done,
            TaskProgress::Failed { .. } => TaskStatus::Failed,
        }
    }

    /// Whether this is the last event of the task.
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

/// A live task's pending entry, as listed by the queue endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub fingerprint: Fingerprint,
    pub filename: String,
}

/// A task's status entry, as listed by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEntry {
    pub fingerprint: Fingerprint,
    pub status: TaskStatus,
}

/// Outcome of registering a fingerprint.
pub enum Registration {
    /// The fingerprint completed earlier; nothing was recorded.
    AlreadyCompleted,

    /// An identical task is queued or running; observe it instead.
    InFlight(TaskWatch),

    /// New work was recorded as queued; the caller owns the task.
    Registered(TaskTicket),

    /// The registry is closed to new work; nothing was recorded.
    Closed,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Registration::AlreadyCompleted => f.write_str("AlreadyCompleted"),
            Registration::InFlight(watch) => write!(f, "InFlight({})", watch.fingerprint()),
            Registration::Registered(ticket) => write!(f, "Registered({})", ticket.fingerprint()),
            Registration::Closed => f.write_str("Closed"),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Default)]
struct RegistryState {
    /// Source filename of live tasks
    pending: HashMap<Fingerprint, String>,

    /// Last known status of every task ever registered
    status: HashMap<Fingerprint, TaskStatus>,

    /// Fingerprints that have reached `Done` at least once
    completed: HashSet<Fingerprint>,

    /// Progress feeds of live tasks, cloned by late submitters
    live: HashMap<Fingerprint, watch::Receiver<TaskProgress>>,

    /// Set once the process starts draining
    closed: bool,
}

/// Process-wide registry of conversion tasks.
///
/// Cloning is cheap and yields a handle to the same registry.
///
/// The completed set is never pruned, so it grows for the lifetime of the
/// process.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a fingerprint unless it already completed or is in flight.
    pub fn try_register(&self, fingerprint: Fingerprint, filename: impl Into<String>) -> Registration {
        let mut state = self.lock();
        if state.closed {
            return Registration::Closed;
        }
        if state.completed.contains(&fingerprint) {
            debug!(task = %fingerprint, "Task already completed");
            return Registration::AlreadyCompleted;
        }
        self.register_locked(&mut state, fingerprint, filename.into())
    }

    /// Register a fingerprint even if it completed before.
    ///
    /// Used when a completed task's artifact has been evicted and must be
    /// produced again. An in-flight task is still joined rather than duplicated.
    pub fn reopen(&self, fingerprint: Fingerprint, filename: impl Into<String>) -> Registration {
        let mut state = self.lock();
        if state.closed {
            return Registration::Closed;
        }
        self.register_locked(&mut state, fingerprint, filename.into())
    }

    fn register_locked(
        &self,
        state: &mut RegistryState,
        fingerprint: Fingerprint,
        filename: String,
    ) -> Registration {
        if let Some(progress) = state.live.get(&fingerprint) {
            debug!(task = %fingerprint, "Joining in-flight task");
            return Registration::InFlight(TaskWatch::new(fingerprint, progress.clone()));
        }

        let (sender, receiver) = watch::channel(TaskProgress::Queued);
        state.live.insert(fingerprint, receiver);
        state.pending.insert(fingerprint, filename);
        state.status.insert(fingerprint, TaskStatus::Queued);

        Registration::Registered(TaskTicket {
            registry: self.clone(),
            fingerprint,
            progress: sender,
            finished: false,
        })
    }

    /// Refuse all further registrations.
    ///
    /// Live tasks are unaffected and still finalize through their tickets, so
    /// once closed the number of in-flight tasks only goes down.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Move a queued task to processing.
    fn mark_processing(&self, fingerprint: &Fingerprint, progress: &watch::Sender<TaskProgress>) {
        let mut state = self.lock();
        match state.status.get_mut(fingerprint) {
            Some(status) if *status == TaskStatus::Queued => {
                *status = TaskStatus::Processing;
                progress.send_replace(TaskProgress::Processing);
            }
            other => {
                warn!(task = %fingerprint, status = ?other, "Ignoring out-of-order transition to processing");
            }
        }
    }

    /// Record a terminal outcome and retire the live entry.
    fn finalize(
        &self,
        fingerprint: &Fingerprint,
        outcome: TaskProgress,
        progress: &watch::Sender<TaskProgress>,
    ) {
        let mut state = self.lock();
        state.pending.remove(fingerprint);
        state.live.remove(fingerprint);

        match &outcome {
            TaskProgress::Done { .. } => {
                state.status.insert(*fingerprint, TaskStatus::Done);
                state.completed.insert(*fingerprint);
            }
            _ => {
                state.status.insert(*fingerprint, TaskStatus::Failed);
            }
        }

        // Published under the lock so a late submitter either cloned the feed
        // before this point or sees the terminal status in the maps.
        progress.send_replace(outcome);
    }

    /// Current status of a fingerprint, if it was ever registered.
    pub fn status(&self, fingerprint: &Fingerprint) -> Option<TaskStatus> {
        self.lock().status.get(fingerprint).copied()
    }

    /// Whether the fingerprint has ever completed.
    pub fn is_completed(&self, fingerprint: &Fingerprint) -> bool {
        self.lock().completed.contains(fingerprint)
    }

    /// Live (queued or processing) tasks for a digest, ordered by format and quality.
    pub fn pending_by_digest(&self, digest: &ContentDigest) -> Vec<PendingEntry> {
        let state = self.lock();
        let mut entries: Vec<PendingEntry> = state
            .pending
            .iter()
            .filter(|(fp, _)| fp.digest == *digest)
            .map(|(fp, filename)| PendingEntry {
                fingerprint: *fp,
                filename: filename.clone(),
            })
            .collect();
        entries.sort_by_key(|entry| entry.fingerprint);
        entries
    }

    /// Status of every task for a digest, ordered by format and quality.
    pub fn status_by_digest(&self, digest: &ContentDigest) -> Vec<StatusEntry> {
        let state = self.lock();
        let mut entries: Vec<StatusEntry> = state
            .status
            .iter()
            .filter(|(fp, _)| fp.digest == *digest)
            .map(|(fp, status)| StatusEntry {
                fingerprint: *fp,
                status: *status,
            })
            .collect();
        entries.sort_by_key(|entry| entry.fingerprint);
        entries
    }

    /// Number of queued or processing tasks.
    pub fn in_flight_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Number of distinct fingerprints that have completed.
    pub fn completed_count(&self) -> usize {
        self.lock().completed.len()
    }
}

// =============================================================================
// Ticket
// =============================================================================

/// Ownership of a registered task.
///
/// Exactly one ticket exists per live task. It is the only way to transition
/// the task, and it finalizes the task as [`TaskFailure::Aborted`] if dropped
/// before [`complete`](Self::complete) or [`fail`](Self::fail).
pub struct TaskTicket {
    registry: TaskRegistry,
    fingerprint: Fingerprint,
    progress: watch::Sender<TaskProgress>,
    finished: bool,
}

impl TaskTicket {
    /// Fingerprint of the owned task.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Observe this task's progress.
    pub fn watch(&self) -> TaskWatch {
        TaskWatch::new(self.fingerprint, self.progress.subscribe())
    }

    /// Transition Queued → Processing.
    pub fn mark_processing(&self) {
        self.registry.mark_processing(&self.fingerprint, &self.progress);
    }

    /// Finalize as done with the produced artifact.
    pub fn complete(mut self, artifact: Bytes) {
        self.finish(TaskProgress::Done { artifact });
    }

    /// Finalize as failed.
    pub fn fail(mut self, failure: TaskFailure) {
        self.finish(TaskProgress::Failed { failure });
    }

    fn finish(&mut self, outcome: TaskProgress) {
        self.finished = true;
        self.registry
            .finalize(&self.fingerprint, outcome, &self.progress);
    }
}

impl Drop for TaskTicket {
    fn drop(&mut self) {
        if !self.finished {
            warn!(task = %self.fingerprint, "Task ended without an outcome, marking failed");
            self.finish(TaskProgress::Failed {
                failure: TaskFailure::Aborted,
            });
        }
    }
}

// =============================================================================
// Watch
// =============================================================================

/// Read-only view of a live task's progress.
#[derive(Clone)]
pub struct TaskWatch {
    fingerprint: Fingerprint,
    receiver: watch::Receiver<TaskProgress>,
}

impl TaskWatch {
    fn new(fingerprint: Fingerprint, receiver: watch::Receiver<TaskProgress>) -> Self {
        Self {
            fingerprint,
            receiver,
        }
    }

    /// Fingerprint of the observed task.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Latest published event.
    pub fn current(&self) -> TaskProgress {
        self.receiver.borrow().clone()
    }

    /// Wait for an event not yet observed through this watch.
    ///
    /// Intermediate events may be skipped if several happen before the caller
    /// polls, but the terminal event is always delivered. Returns `None` once
    /// the task can no longer change.
    pub async fn next(&mut self) -> Option<TaskProgress> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Wait for the terminal event.
    pub async fn wait(mut self) -> TaskProgress {
        loop {
            let current = self.receiver.borrow_and_update().clone();
            if current.is_terminal() {
                return current;
            }
            if self.receiver.changed().await.is_err() {
                let last = self.receiver.borrow().clone();
                return if last.is_terminal() {
                    last
                } else {
                    TaskProgress::Failed {
                        failure: TaskFailure::Aborted,
                    }
                };
            }
        }
    }
}

impl std::fmt::Debug for TaskWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskWatch")
            .field("fingerprint", self.fingerprint())
            .field("current", &self.current().status())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
