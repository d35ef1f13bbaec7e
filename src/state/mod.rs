// src/state/mod.rs

//! Persisted build state.
//!
//! The store is the only mutable shared resource of a build. Every entry is
//! written under a per-identifier lock with a write-temp-then-rename pattern,
//! and readers never take a lock. A record that cannot be read is reported
//! as stale, never as up to date.

pub mod file_store;
pub mod memory_store;
pub mod record;
pub mod staleness;

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;

use tracing::warn;

use crate::errors::StateError;
use crate::fingerprint::Fingerprint;
use crate::step_id::StepId;
use crate::types::StateStorageMode;

pub use file_store::FileStateStore;
pub use memory_store::MemoryStateStore;
pub use record::{BuildRecord, BuildStatus};
pub use staleness::{OutputCheck, Staleness, evaluate_record};

/// Storage for one [`BuildRecord`] per step identifier.
pub trait StateStore: Send + Sync + Debug {
    /// `Ok(None)` when the step was never recorded. Unreadable or
    /// untrustworthy entries are `Err(StateError::Corrupt { .. })`.
    fn get(&self, id: &StepId) -> Result<Option<BuildRecord>, StateError>;

    /// Atomically replace the record of `id`.
    fn put(&self, id: &StepId, record: &BuildRecord) -> Result<(), StateError>;

    /// Delete records whose step is not in `active`. Returns how many were removed.
    fn prune(&self, active: &BTreeSet<StepId>) -> Result<usize, StateError>;

    /// Why `id` must be rebuilt, or [`Staleness::Fresh`].
    fn staleness(
        &self,
        id: &StepId,
        current: &Fingerprint,
        outputs: OutputCheck<'_>,
    ) -> Staleness {
        match self.get(id) {
            Ok(None) => Staleness::NoRecord,
            Ok(Some(record)) => evaluate_record(&record, current, outputs),
            Err(err) => {
                warn!(step = %id, error = %err, "state record unreadable; treating step as stale");
                Staleness::Corrupt(err.to_string())
            }
        }
    }

    fn is_stale(&self, id: &StepId, current: &Fingerprint, outputs: OutputCheck<'_>) -> bool {
        self.staleness(id, current, outputs).is_stale()
    }
}

/// Open the store selected by `mode` for a dry run: records are read, and
/// nothing is created on disk.
pub fn open_store_read_only(
    mode: StateStorageMode,
    state_dir: &std::path::Path,
) -> Arc<dyn StateStore> {
    match mode {
        StateStorageMode::File => Arc::new(FileStateStore::open_read_only(state_dir)),
        StateStorageMode::Memory => Arc::new(MemoryStateStore::new()),
    }
}

/// Open the store selected by `mode`.
pub fn open_store(
    mode: StateStorageMode,
    state_dir: &std::path::Path,
) -> Result<Arc<dyn StateStore>, StateError> {
    match mode {
        StateStorageMode::File => Ok(Arc::new(FileStateStore::open(state_dir)?)),
        StateStorageMode::Memory => Ok(Arc::new(MemoryStateStore::new())),
    }
}
