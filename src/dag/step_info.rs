// src/dag/step_info.rs

//! Per-run step metadata and state.

use std::fmt;

use crate::errors::StepExecutionError;
use crate::fingerprint::Fingerprint;
use crate::step_id::StepId;

/// Why a step was not attempted in this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A (transitive) dependency ended in `Failed`.
    UpstreamFailed(StepId),
    /// The run was cancelled before the step was dispatched.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UpstreamFailed(id) => write!(f, "upstream step {id} failed"),
            SkipReason::Cancelled => f.write_str("run cancelled"),
        }
    }
}

/// State of a step during one run.
///
/// `Pending -> (Stale | Fresh)`, `Stale -> Running -> (Succeeded | Failed)`,
/// and any step downstream of a failure that has not run becomes `Skipped`.
#[derive(Debug, Clone, PartialEq)]
pub enum StepState {
    /// Part of the run but not yet classified.
    Pending,
    /// Needs to run.
    Stale,
    /// Up to date; treated as trivially succeeded.
    Fresh,
    Running,
    Succeeded,
    Failed(StepExecutionError),
    Skipped(SkipReason),
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Fresh | StepState::Succeeded | StepState::Failed(_) | StepState::Skipped(_)
        )
    }

    /// Short lowercase label used in summaries and plan listings.
    pub fn label(&self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Stale => "stale",
            StepState::Fresh => "fresh",
            StepState::Running => "running",
            StepState::Succeeded => "succeeded",
            StepState::Failed(_) => "failed",
            StepState::Skipped(_) => "skipped",
        }
    }
}

/// Static step information for the run plus its current state.
#[derive(Debug, Clone)]
pub struct StepInfo {
    pub id: StepId,
    /// Direct step dependencies that are part of this run.
    pub deps: Vec<StepId>,
    pub fingerprint: Option<Fingerprint>,
    pub state: StepState,
}

impl StepInfo {
    pub fn new(id: StepId, deps: Vec<StepId>) -> Self {
        Self {
            id,
            deps,
            fingerprint: None,
            state: StepState::Pending,
        }
    }
}

/// A step the scheduler wants the executor to run now.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledStep {
    pub id: StepId,
    pub fingerprint: Fingerprint,
    /// Identifier shared by every step dispatched in the same run.
    pub run_id: u64,
}
