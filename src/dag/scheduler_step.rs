// src/dag/scheduler_step.rs

//! Step-by-step result type for the scheduler.

use crate::dag::step_info::ScheduledStep;
use crate::step_id::StepId;

/// Structured result of a single scheduler transition.
///
/// Tests use it to step the scheduler by hand and assert on what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Steps that became ready and were marked `Running`.
    pub newly_scheduled: Vec<ScheduledStep>,
    /// Steps newly marked `Skipped` by this transition.
    pub newly_skipped: Vec<StepId>,
    /// Whether this transition left every step in a terminal state.
    pub run_just_finished: bool,
}
