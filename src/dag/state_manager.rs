// src/dag/state_manager.rs

//! Per-run state transitions for steps in the scheduler.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use crate::dag::step_info::{ScheduledStep, SkipReason, StepInfo, StepState};
use crate::step_id::StepId;

/// Mutating view over the per-run step table.
pub struct StateManager<'a> {
    steps: &'a mut BTreeMap<StepId, StepInfo>,
    dependents: &'a HashMap<StepId, Vec<StepId>>,
    run_id: u64,
}

impl<'a> StateManager<'a> {
    pub fn new(
        steps: &'a mut BTreeMap<StepId, StepInfo>,
        dependents: &'a HashMap<StepId, Vec<StepId>>,
        run_id: u64,
    ) -> Self {
        Self {
            steps,
            dependents,
            run_id,
        }
    }

    /// Mark every transitive dependent of `failed` that has not run as
    /// `Skipped(UpstreamFailed)`.
    ///
    /// `Fresh` dependents are skipped as well. Returns the newly skipped
    /// steps in identifier order.
    pub fn mark_dependents_skipped(&mut self, failed: &StepId) -> Vec<StepId> {
        let mut stack: Vec<StepId> = dependents_of(self.dependents, failed).to_vec();
        let mut newly_skipped = Vec::new();

        while let Some(id) = stack.pop() {
            let Some(info) = self.steps.get_mut(&id) else {
                continue;
            };

            match info.state {
                StepState::Pending | StepState::Stale | StepState::Fresh => {
                    info.state = StepState::Skipped(SkipReason::UpstreamFailed(failed.clone()));
                    debug!(
                        step = %id,
                        upstream = %failed,
                        "skipping dependent due to upstream failure"
                    );
                    newly_skipped.push(id.clone());
                    stack.extend(dependents_of(self.dependents, &id).iter().cloned());
                }
                StepState::Running => {
                    // Cannot happen: a running step had all deps settled.
                    warn!(step = %id, upstream = %failed, "dependent of failed step is running");
                }
                StepState::Succeeded | StepState::Failed(_) | StepState::Skipped(_) => {}
            }
        }

        newly_skipped.sort();
        newly_skipped
    }

    /// Mark every step that has not been dispatched as `Skipped(Cancelled)`.
    pub fn mark_not_started_cancelled(&mut self) -> Vec<StepId> {
        let mut skipped = Vec::new();
        for info in self.steps.values_mut() {
            if matches!(info.state, StepState::Pending | StepState::Stale) {
                info.state = StepState::Skipped(SkipReason::Cancelled);
                skipped.push(info.id.clone());
            }
        }
        skipped
    }

    /// Collect up to `limit` stale steps whose dependencies are settled, in
    /// identifier order, mark them `Running` and return them.
    pub fn collect_new_ready_steps(&mut self, limit: usize) -> Vec<ScheduledStep> {
        if limit == 0 {
            return Vec::new();
        }

        let candidates: Vec<StepId> = {
            let ro = ReadOnlyStateManager::new(self.steps);
            self.steps
                .values()
                .filter(|info| matches!(info.state, StepState::Stale))
                .filter(|info| ro.deps_settled(info))
                .take(limit)
                .map(|info| info.id.clone())
                .collect()
        };

        let mut ready = Vec::with_capacity(candidates.len());
        for id in candidates {
            let Some(info) = self.steps.get_mut(&id) else {
                continue;
            };
            let Some(fingerprint) = info.fingerprint.clone() else {
                warn!(step = %id, "stale step has no fingerprint; not dispatching");
                continue;
            };

            info!(step = %id, run_id = self.run_id, "scheduling step");
            info.state = StepState::Running;
            ready.push(ScheduledStep {
                id,
                fingerprint,
                run_id: self.run_id,
            });
        }

        ready
    }
}

fn dependents_of<'m>(dependents: &'m HashMap<StepId, Vec<StepId>>, id: &StepId) -> &'m [StepId] {
    dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
}

/// Read-only view used to answer dependency questions.
pub struct ReadOnlyStateManager<'a> {
    steps: &'a BTreeMap<StepId, StepInfo>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(steps: &'a BTreeMap<StepId, StepInfo>) -> Self {
        Self { steps }
    }

    /// All direct dependencies of `info` are settled.
    pub fn deps_settled(&self, info: &StepInfo) -> bool {
        let mut memo = HashMap::new();
        info.deps.iter().all(|dep| self.is_settled(dep, &mut memo))
    }

    /// A step is settled when it `Succeeded`, or when it is `Fresh` and its
    /// own dependencies are settled. A fresh step behind a stale one waits.
    pub fn is_settled(&self, id: &StepId, memo: &mut HashMap<StepId, bool>) -> bool {
        if let Some(known) = memo.get(id) {
            return *known;
        }

        let settled = match self.steps.get(id) {
            Some(info) => match info.state {
                StepState::Succeeded => true,
                StepState::Fresh => info.deps.iter().all(|dep| self.is_settled(dep, memo)),
                _ => false,
            },
            None => {
                warn!(step = %id, "dependency missing from run; treating as unsettled");
                false
            }
        };

        memo.insert(id.clone(), settled);
        settled
    }
}
