// src/state/record.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::step_id::StepId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Succeeded,
    Failed,
}

/// What the store remembers about the last build of one step.
///
/// ```json
/// {
///   "step": "data://garden/who/2024-01-01/gho",
///   "fingerprint": "4c7d...",
///   "output_checksum": "e3b0...",
///   "built_at": "2024-05-01T10:00:00Z",
///   "duration_ms": 1520,
///   "status": "succeeded"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub step: StepId,
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub output_checksum: Option<String>,
    pub built_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: BuildStatus,
}

impl BuildRecord {
    /// Record for a successful build finishing now.
    pub fn succeeded(
        step: StepId,
        fingerprint: Fingerprint,
        output_checksum: Option<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            step,
            fingerprint,
            output_checksum,
            built_at: Utc::now(),
            duration_ms,
            status: BuildStatus::Succeeded,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == BuildStatus::Succeeded
    }
}
