// src/engine/report.rs

use std::fmt::Write as _;

use crate::dag::StepState;
use crate::errors::StepExecutionError;
use crate::fingerprint::Fingerprint;
use crate::step_id::StepId;

#[derive(Debug, Clone)]
pub struct StepReport {
    pub id: StepId,
    pub state: StepState,
    pub fingerprint: Option<Fingerprint>,
    /// Wall time of the runner call, for steps that ran.
    pub duration_ms: Option<u64>,
    /// Why the step was (or was not) scheduled.
    pub reason: String,
}

/// Outcome of one executor run.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub run_id: u64,
    /// Every step of the run, in execution order.
    pub steps: Vec<StepReport>,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl BuildReport {
    pub fn step(&self, id: &StepId) -> Option<&StepReport> {
        self.steps.iter().find(|s| &s.id == id)
    }

    pub fn state_of(&self, id: &StepId) -> Option<&StepState> {
        self.step(id).map(|s| &s.state)
    }

    fn ids_where(&self, pred: impl Fn(&StepState) -> bool) -> Vec<&StepId> {
        self.steps
            .iter()
            .filter(|s| pred(&s.state))
            .map(|s| &s.id)
            .collect()
    }

    pub fn succeeded(&self) -> Vec<&StepId> {
        self.ids_where(|s| matches!(s, StepState::Succeeded))
    }

    pub fn fresh(&self) -> Vec<&StepId> {
        self.ids_where(|s| matches!(s, StepState::Fresh))
    }

    pub fn failed(&self) -> Vec<&StepId> {
        self.ids_where(|s| matches!(s, StepState::Failed(_)))
    }

    pub fn skipped(&self) -> Vec<&StepId> {
        self.ids_where(|s| matches!(s, StepState::Skipped(_)))
    }

    /// Steps whose runner was actually invoked.
    pub fn executed(&self) -> Vec<&StepId> {
        self.ids_where(|s| matches!(s, StepState::Succeeded | StepState::Failed(_)))
    }

    /// A step failed for a reason other than cancellation.
    pub fn has_failures(&self) -> bool {
        self.steps.iter().any(|s| {
            matches!(&s.state, StepState::Failed(err) if *err != StepExecutionError::Cancelled)
        })
    }

    /// 0 when every step is `Succeeded` or `Fresh`, 1 when any step failed,
    /// 130 when the run was cancelled without other failures.
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else if self.cancelled {
            130
        } else {
            0
        }
    }

    /// End-of-run summary printed to stdout.
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "run {}: {} succeeded, {} fresh, {} skipped, {} failed in {} ms{}",
            self.run_id,
            self.succeeded().len(),
            self.fresh().len(),
            self.skipped().len(),
            self.failed().len(),
            self.elapsed_ms,
            if self.cancelled { " (cancelled)" } else { "" }
        );

        for step in &self.steps {
            let detail = match &step.state {
                StepState::Failed(err) => err.to_string(),
                StepState::Skipped(reason) => reason.to_string(),
                StepState::Succeeded => match step.duration_ms {
                    Some(ms) => format!("{ms} ms, {}", step.reason),
                    None => step.reason.clone(),
                },
                _ => step.reason.clone(),
            };
            let _ = writeln!(out, "  {:<9} {}  ({detail})", step.state.label(), step.id);
        }
        out
    }
}
