// src/exec/verify.rs

use std::path::PathBuf;

use tracing::debug;

use crate::errors::StepExecutionError;
use crate::fingerprint::{OutputHashError, outputs_checksum};
use crate::fs::FileSystem;

/// Check declared outputs after a successful runner call and return the
/// checksum to record.
///
/// With declared outputs every one must exist and the aggregate checksum is
/// authoritative; a differing runner-reported checksum fails the step.
/// Without declared outputs the runner's checksum is recorded as-is.
pub fn verify_outputs(
    fs: &dyn FileSystem,
    outputs: &[PathBuf],
    reported: Option<&str>,
) -> Result<Option<String>, StepExecutionError> {
    let actual = match outputs_checksum(fs, outputs) {
        Ok(Some(actual)) => actual,
        Ok(None) => return Ok(reported.map(str::to_string)),
        Err(OutputHashError::Missing(path)) => {
            return Err(StepExecutionError::OutputMissing(path.display().to_string()));
        }
        Err(OutputHashError::Unreadable { path, source }) => {
            return Err(StepExecutionError::OutputMissing(format!(
                "{} ({source})",
                path.display()
            )));
        }
    };

    if let Some(reported) = reported
        && reported != actual
    {
        return Err(StepExecutionError::ChecksumMismatch {
            reported: reported.to_string(),
            actual,
        });
    }

    debug!(outputs = outputs.len(), checksum = %actual, "outputs verified");
    Ok(Some(actual))
}
