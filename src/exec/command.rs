// src/exec/command.rs

//! Shell-command step runner.

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::engine::CancelSignal;
use crate::errors::StepExecutionError;
use crate::exec::runner::{RunFuture, StepOutput, StepRequest, StepRunner};

pub const ENV_STEP: &str = "STEPDAG_STEP";
pub const ENV_FINGERPRINT: &str = "STEPDAG_FINGERPRINT";
pub const ENV_RUN_ID: &str = "STEPDAG_RUN_ID";
pub const ENV_DEPS: &str = "STEPDAG_DEPS";

/// Runs a step's `cmd` through the platform shell in the step's manifest
/// directory.
///
/// The child sees `STEPDAG_STEP`, `STEPDAG_FINGERPRINT`, `STEPDAG_RUN_ID`
/// and `STEPDAG_DEPS` (newline separated identifiers). A non-zero exit fails
/// the step; cancellation kills the child.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner;

impl CommandRunner {
    pub fn new() -> Self {
        Self
    }
}

impl StepRunner for CommandRunner {
    fn run(&self, request: StepRequest, cancel: CancelSignal) -> RunFuture {
        Box::pin(async move {
            let step = request.id.clone();
            let run_id = request.run_id;
            match run_command(request, cancel).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(step = %step, run_id, error = %err, "step execution error");
                    Err(StepExecutionError::Runner(format!("{err:#}")))
                }
            }
        })
    }
}

/// Outer `Result` is infrastructure trouble (spawn, wait); the inner one is
/// the step's own outcome.
async fn run_command(
    request: StepRequest,
    cancel: CancelSignal,
) -> Result<Result<StepOutput, StepExecutionError>> {
    let Some(cmd_line) = request.cmd.as_deref() else {
        return Ok(Err(StepExecutionError::NoCommand));
    };

    info!(
        step = %request.id,
        run_id = request.run_id,
        cmd = %cmd_line,
        "starting step process"
    );

    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd_line);
        c
    };

    let deps = request
        .deps
        .keys()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    cmd.current_dir(&request.workdir)
        .env(ENV_STEP, request.id.as_str())
        .env(ENV_FINGERPRINT, request.fingerprint.as_str())
        .env(ENV_RUN_ID, request.run_id.to_string())
        .env(ENV_DEPS, deps)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for step '{}'", request.id))?;

    // Always drain both pipes so the child never blocks on a full buffer.
    if let Some(stdout) = child.stdout.take() {
        let step = request.id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(step = %step, "stdout: {}", line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let step = request.id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(step = %step, "stderr: {}", line);
            }
        });
    }

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res
                .with_context(|| format!("waiting for process of step '{}'", request.id))?;
            let code = status.code().unwrap_or(-1);

            info!(
                step = %request.id,
                run_id = request.run_id,
                exit_code = code,
                success = status.success(),
                "step process exited"
            );

            if status.success() {
                Ok(Ok(StepOutput::default()))
            } else {
                Ok(Err(StepExecutionError::ExitStatus(code)))
            }
        }

        _ = cancel.cancelled() => {
            info!(
                step = %request.id,
                run_id = request.run_id,
                "cancellation requested; killing step process"
            );
            if let Err(e) = child.kill().await {
                warn!(
                    step = %request.id,
                    run_id = request.run_id,
                    error = %e,
                    "failed to kill child process on cancellation"
                );
            }
            Ok(Err(StepExecutionError::Cancelled))
        }
    }
}
