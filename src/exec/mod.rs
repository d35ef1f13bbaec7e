// src/exec/mod.rs

//! Step execution layer.
//!
//! - [`runner`] defines the `StepRunner` contract the executor calls.
//! - [`command`] is the production runner that spawns `cmd` through the
//!   shell with `tokio::process::Command`.
//! - [`verify`] checks declared outputs after a successful run.

pub mod command;
pub mod runner;
pub mod verify;

pub use command::CommandRunner;
pub use runner::{ResolvedDependency, RunFuture, StepOutput, StepRequest, StepRunner};
pub use verify::verify_outputs;
