// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Structural errors (`ManifestError`, `CycleError`, `InvalidIdentifierError`)
//! abort a run before anything executes. `StepExecutionError` is collected per
//! step in the build report. `StateError::Corrupt` is downgraded to staleness
//! by the state store callers.

use std::path::PathBuf;

use thiserror::Error;

use crate::step_id::StepId;

/// A free-form string could not be parsed into a [`StepId`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid identifier '{input}': {reason}")]
pub struct InvalidIdentifierError {
    pub input: String,
    pub reason: String,
}

impl InvalidIdentifierError {
    pub fn new(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("reading manifest {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing manifest {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("manifest {path:?}: {source}")]
    InvalidIdentifier {
        path: PathBuf,
        #[source]
        source: InvalidIdentifierError,
    },

    #[error("'{id}' is defined twice ({first:?} and {second:?})")]
    Duplicate {
        id: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("step '{step}' depends on unknown identifier '{dep}'")]
    UnresolvedDependency { step: StepId, dep: StepId },

    #[error("step '{0}' cannot depend on itself")]
    SelfDependency(StepId),

    #[error("manifest {path:?}: '{id}' is declared as a {declared_as} but its scheme says otherwise")]
    WrongKind {
        path: PathBuf,
        id: StepId,
        declared_as: &'static str,
    },

    #[error("manifest {path:?}: {message}")]
    Invalid { path: PathBuf, message: String },
}

/// The dependency graph contains a cycle. `members` lists the cycle in
/// traversal order, starting and ending with the same identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cycle detected in step graph: {}", render_cycle(.members))]
pub struct CycleError {
    pub members: Vec<StepId>,
}

fn render_cycle(members: &[StepId]) -> String {
    members
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("state store I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The entry exists but cannot be trusted.
    #[error("corrupt state record for '{step}' at {path:?}: {reason}")]
    Corrupt {
        step: String,
        path: PathBuf,
        reason: String,
    },

    #[error("serialising build record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Why a single step did not succeed. Reported per step, never fatal to the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepExecutionError {
    #[error("step has no `cmd` to run")]
    NoCommand,

    #[error("process exited with status {0}")]
    ExitStatus(i32),

    #[error("runner error: {0}")]
    Runner(String),

    #[error("interrupted by cancellation")]
    Cancelled,

    #[error("declared output is missing: {0}")]
    OutputMissing(String),

    #[error("output checksum mismatch: runner reported {reported}, outputs hash to {actual}")]
    ChecksumMismatch { reported: String, actual: String },

    #[error("recording build state failed: {0}")]
    StateWrite(String),
}

#[derive(Error, Debug)]
pub enum StepdagError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    InvalidIdentifier(#[from] InvalidIdentifierError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("selection error: {0}")]
    Selection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StepdagError>;
