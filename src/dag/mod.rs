// src/dag/mod.rs

//! Dependency graph and per-run scheduling.
//!
//! - [`graph`] builds the step DAG from a manifest, rejects cycles and
//!   answers ordering and reachability questions.
//! - [`scheduler`] is the pure per-run state machine that decides which
//!   steps are ready and what happens to dependents on failure.
//! - [`step_info`] holds per-step run state and scheduled step types.
//! - [`scheduler_step`] is the result type of a scheduler transition.
//! - [`state_manager`] implements the state transitions themselves.

pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod step_info;

pub use graph::StepGraph;
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
pub use step_info::{ScheduledStep, SkipReason, StepInfo, StepState};
