// src/state/staleness.rs

//! Why a step needs rebuilding.

use std::fmt;
use std::path::PathBuf;

use tracing::debug;

use crate::fingerprint::{Fingerprint, OutputHashError, outputs_checksum};
use crate::fs::FileSystem;
use crate::state::record::BuildRecord;

/// Result of comparing a step's current fingerprint and outputs against its
/// build record. Everything except `Fresh` means the step must run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    NoRecord,
    FingerprintChanged,
    PreviousFailure,
    OutputMissing(PathBuf),
    OutputChanged,
    /// The record could not be read or trusted.
    Corrupt(String),
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        !matches!(self, Staleness::Fresh)
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Staleness::Fresh => f.write_str("fresh"),
            Staleness::NoRecord => f.write_str("never built"),
            Staleness::FingerprintChanged => f.write_str("fingerprint changed"),
            Staleness::PreviousFailure => f.write_str("previous build failed"),
            Staleness::OutputMissing(path) => write!(f, "output missing: {}", path.display()),
            Staleness::OutputChanged => f.write_str("output checksum changed"),
            Staleness::Corrupt(reason) => write!(f, "unreadable record: {reason}"),
        }
    }
}

/// Declared outputs of a step and the filesystem to check them on.
#[derive(Clone, Copy)]
pub struct OutputCheck<'a> {
    pub fs: &'a dyn FileSystem,
    pub paths: &'a [PathBuf],
}

impl<'a> OutputCheck<'a> {
    pub fn new(fs: &'a dyn FileSystem, paths: &'a [PathBuf]) -> Self {
        Self { fs, paths }
    }
}

impl fmt::Debug for OutputCheck<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputCheck")
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

/// Compare an existing record against the current state of the step.
///
/// Outputs are verified by checksum, not presence alone, so an output that
/// was edited or truncated after the build is caught.
pub fn evaluate_record(
    record: &BuildRecord,
    current: &Fingerprint,
    outputs: OutputCheck<'_>,
) -> Staleness {
    if !record.is_success() {
        return Staleness::PreviousFailure;
    }
    if &record.fingerprint != current {
        debug!(
            step = %record.step,
            stored = %record.fingerprint.short(),
            current = %current.short(),
            "fingerprint changed"
        );
        return Staleness::FingerprintChanged;
    }

    match outputs_checksum(outputs.fs, outputs.paths) {
        Ok(None) => Staleness::Fresh,
        Ok(Some(actual)) => {
            if record.output_checksum.as_deref() == Some(actual.as_str()) {
                Staleness::Fresh
            } else {
                Staleness::OutputChanged
            }
        }
        Err(OutputHashError::Missing(path)) => Staleness::OutputMissing(path),
        Err(OutputHashError::Unreadable { path, source }) => {
            debug!(path = ?path, error = %source, "output unreadable");
            Staleness::OutputMissing(path)
        }
    }
}
