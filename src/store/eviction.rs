//! Served-artifact eviction.
//!
//! Every artifact handed out by the download endpoint is recorded in an
//! [`EvictionLedger`]. Once the number of recorded serves reaches the
//! threshold, the next sweep deletes every recorded file and starts over.
//!
//! ```text
//!  download ──► record_served ──► [paths..., count]
//!                                        │
//!  sweeper (every interval) ──► sweep ───┘  count >= threshold?
//!                                              yes: delete all, reset
//!                                              no:  nothing
//! ```
//!
//! The list and the counter sit behind one async mutex and are always mutated
//! together. The lock is held across the deletions of a sweep, so a serve that
//! races with a sweep lands in the next cycle.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default number of serves that triggers a sweep.
pub const DEFAULT_EVICTION_THRESHOLD: usize = 50;

/// Default period between sweep attempts.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct LedgerState {
    served: Vec<PathBuf>,
    count: usize,
}

/// Outcome of a single [`EvictionLedger::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Whether the threshold was reached and the ledger was cleared
    pub swept: bool,

    /// Files deleted
    pub removed: usize,

    /// Files that could not be deleted (already gone, permissions, ...)
    pub failed: usize,
}

/// Ordered record of served artifact paths with a serve counter.
#[derive(Debug)]
pub struct EvictionLedger {
    state: Mutex<LedgerState>,
    threshold: usize,
}

impl EvictionLedger {
    /// Create a ledger that sweeps once `threshold` serves are recorded (at least 1).
    pub fn new(threshold: usize) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            threshold: threshold.max(1),
        }
    }

    /// Serve count at which a sweep deletes files.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Record that `path` was served.
    pub async fn record_served(&self, path: PathBuf) {
        let mut state = self.state.lock().await;
        state.served.push(path);
        state.count += 1;
        debug!(served = state.count, threshold = self.threshold, "Recorded served artifact");
    }

    /// Number of serves since the last sweep.
    pub async fn served_count(&self) -> usize {
        self.state.lock().await.count
    }

    /// Delete every recorded file if the threshold has been reached.
    ///
    /// Deletion is best-effort: a file that cannot be removed is logged and
    /// skipped, and the ledger is cleared regardless.
    pub async fn sweep(&self) -> SweepReport {
        let mut state = self.state.lock().await;
        if state.count < self.threshold {
            return SweepReport::default();
        }

        let mut report = SweepReport {
            swept: true,
            ..SweepReport::default()
        };

        for path in state.served.drain(..) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    // Same artifact served more than once
                    debug!(path = %path.display(), "Artifact already removed");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove artifact");
                    report.failed += 1;
                }
            }
        }
        state.count = 0;

        info!(
            removed = report.removed,
            failed = report.failed,
            "Swept served artifacts"
        );
        report
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the runtime shuts down.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}

impl Default for EvictionLedger {
    fn default() -> Self {
        Self::new(DEFAULT_EVICTION_THRESHOLD)
    }
}

// =============================================================================
// Tests
// =============================================================================
