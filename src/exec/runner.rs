// src/exec/runner.rs

//! Contract between the executor and whatever performs a step's work.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::engine::CancelSignal;
use crate::errors::StepExecutionError;
use crate::fingerprint::Fingerprint;
use crate::step_id::StepId;

/// Future returned by [`StepRunner::run`].
pub type RunFuture =
    Pin<Box<dyn Future<Output = Result<StepOutput, StepExecutionError>> + Send + 'static>>;

/// An already-built input of the step being run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedDependency {
    Step {
        fingerprint: Fingerprint,
        output_checksum: Option<String>,
        outputs: Vec<PathBuf>,
    },
    Snapshot {
        hash: String,
        size: Option<u64>,
    },
}

/// Everything a runner needs to build one step.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub id: StepId,
    pub run_id: u64,
    pub fingerprint: Fingerprint,
    pub cmd: Option<String>,
    pub params: toml::Table,
    /// Declared outputs, already resolved to paths.
    pub outputs: Vec<PathBuf>,
    /// Directory of the manifest that declared the step.
    pub workdir: PathBuf,
    pub deps: BTreeMap<StepId, ResolvedDependency>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    /// Checksum of the produced outputs, if the runner computes one.
    pub checksum: Option<String>,
}

/// Performs the transformation of a single step.
///
/// Production code uses [`CommandRunner`](crate::exec::CommandRunner);
/// tests provide fakes that record calls instead of spawning processes.
/// Implementations should watch `cancel` and return
/// [`StepExecutionError::Cancelled`] when they stop early.
pub trait StepRunner: Send + Sync {
    fn run(&self, request: StepRequest, cancel: CancelSignal) -> RunFuture;
}
