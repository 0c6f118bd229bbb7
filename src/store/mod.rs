//! Artifact storage and eviction.
//!
//! - [`OutputStore`]: deterministic file naming, atomic writes, lookup by
//!   fingerprint or digest
//! - [`EvictionLedger`]: served-artifact accounting with threshold sweeps

mod eviction;
mod output;

pub use eviction::{EvictionLedger, SweepReport, DEFAULT_EVICTION_THRESHOLD, DEFAULT_SWEEP_INTERVAL};
pub use output::{OutputStore, ResolvedArtifact, DEFAULT_OUTPUT_DIR};
