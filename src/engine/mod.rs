// src/engine/mod.rs

//! Build orchestration.
//!
//! - [`plan`] fingerprints the closure of the targets and classifies every
//!   step as fresh or stale against the state store.
//! - [`executor`] is the async shell that runs stale steps through a
//!   `StepRunner`, driven by the pure `dag::Scheduler`.
//! - [`cancel`] is the run-level cancellation signal.
//! - [`report`] is the per-run outcome and exit code.

pub mod cancel;
pub mod executor;
pub mod plan;
pub mod report;

pub use cancel::CancelSignal;
pub use executor::{Executor, ExecutorOptions};
pub use plan::{BuildPlan, PlannedStep};
pub use report::{BuildReport, StepReport};
