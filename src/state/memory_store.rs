// src/state/memory_store.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::errors::StateError;
use crate::state::StateStore;
use crate::state::record::BuildRecord;
use crate::step_id::StepId;

/// In-process store; records are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<BTreeMap<StepId, BuildRecord>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<StepId, BuildRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, id: &StepId) -> Result<Option<BuildRecord>, StateError> {
        Ok(self.records().get(id).cloned())
    }

    fn put(&self, id: &StepId, record: &BuildRecord) -> Result<(), StateError> {
        debug!(step = %id, fingerprint = %record.fingerprint.short(), "recording build (memory)");
        self.records().insert(id.clone(), record.clone());
        Ok(())
    }

    fn prune(&self, active: &BTreeSet<StepId>) -> Result<usize, StateError> {
        let mut records = self.records();
        let before = records.len();
        records.retain(|id, _| active.contains(id));
        Ok(before - records.len())
    }
}
