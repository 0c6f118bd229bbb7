//! Bounded admission for conversion jobs.
//!
//! Conversions are CPU and I/O heavy, so the number running at once is capped
//! system-wide. Jobs beyond the cap wait, first come first served, for a slot.
//!
//! A slot is an [`ExecutorSlot`] guard. It is released when dropped, so a job
//! gives its slot back on every exit path, including early returns and panics.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default number of conversions allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 3;

/// Error returned when acquiring a slot from a closed executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("executor is closed")]
pub struct ExecutorClosed;

/// Held for the duration of one job.
#[derive(Debug)]
pub struct ExecutorSlot {
    _permit: OwnedSemaphorePermit,
}

/// Fixed-capacity gate for concurrently running jobs.
///
/// Cloning yields a handle to the same gate.
#[derive(Debug, Clone)]
pub struct BoundedExecutor {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl BoundedExecutor {
    /// Create an executor admitting `capacity` jobs at once (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<ExecutorSlot, ExecutorClosed> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ExecutorClosed)?;
        Ok(ExecutorSlot { _permit: permit })
    }

    /// Run `job` on the runtime once a slot is free, holding the slot until it finishes.
    ///
    /// Resolves to `None` if the executor was closed before the job was admitted;
    /// the job future is then dropped without being polled.
    pub fn spawn<F>(&self, job: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let executor = self.clone();
        tokio::spawn(async move {
            let slot = match executor.acquire().await {
                Ok(slot) => slot,
                Err(ExecutorClosed) => {
                    warn!("Executor closed, dropping job");
                    return None;
                }
            };
            debug!(running = executor.running(), "Job admitted");
            let output = job.await;
            drop(slot);
            Some(output)
        })
    }

    /// Stop admitting jobs. Jobs already holding a slot run to completion.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Maximum number of concurrent jobs.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently held.
    pub fn running(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }
}

impl Default for BoundedExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_TASKS)
    }
}

// =============================================================================
// Tests
// =============================================================================
