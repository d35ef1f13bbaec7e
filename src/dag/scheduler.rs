// src/dag/scheduler.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::dag::graph::StepGraph;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{ReadOnlyStateManager, StateManager};
use crate::dag::step_info::{ScheduledStep, StepInfo, StepState};
use crate::errors::StepExecutionError;
use crate::fingerprint::Fingerprint;
use crate::step_id::StepId;

/// Per-run state machine over the steps of one build.
///
/// It is responsible for:
/// - remembering which steps take part in the run and their fingerprints
/// - deciding when a stale step is ready (every dependency settled)
/// - capping the number of `Running` steps at the worker limit
/// - skipping dependents when a step fails
/// - skipping everything not yet started when the run is cancelled
///
/// It performs no IO; the async executor feeds it completions and
/// dispatches whatever it returns.
#[derive(Debug)]
pub struct Scheduler {
    steps: BTreeMap<StepId, StepInfo>,
    dependents: HashMap<StepId, Vec<StepId>>,
    workers: usize,
    running: usize,
    run_id: u64,
    cancelled: bool,
}

impl Scheduler {
    /// Scheduler over `members` (steps only); every step starts `Pending`.
    ///
    /// Dependencies outside `members` are ignored: they are not part of
    /// this run.
    pub fn new<'a, I>(graph: &StepGraph, members: I, workers: usize, run_id: u64) -> Self
    where
        I: IntoIterator<Item = &'a StepId>,
    {
        let members: BTreeSet<StepId> = members
            .into_iter()
            .filter(|id| graph.is_step(id))
            .cloned()
            .collect();

        let mut steps = BTreeMap::new();
        let mut dependents: HashMap<StepId, Vec<StepId>> = HashMap::new();

        for id in &members {
            let deps: Vec<StepId> = graph
                .step_dependencies_of(id)
                .into_iter()
                .filter(|d| members.contains(*d))
                .cloned()
                .collect();
            for dep in &deps {
                dependents.entry(dep.clone()).or_default().push(id.clone());
            }
            steps.insert(id.clone(), StepInfo::new(id.clone(), deps));
        }

        debug!(steps = steps.len(), workers, run_id, "scheduler created");

        Self {
            steps,
            dependents,
            workers: workers.max(1),
            running: 0,
            run_id,
            cancelled: false,
        }
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn running_count(&self) -> usize {
        self.running
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn state_of(&self, id: &StepId) -> Option<&StepState> {
        self.steps.get(id).map(|info| &info.state)
    }

    pub fn fingerprint_of(&self, id: &StepId) -> Option<&Fingerprint> {
        self.steps.get(id).and_then(|info| info.fingerprint.as_ref())
    }

    /// All steps in identifier order.
    pub fn steps(&self) -> impl Iterator<Item = &StepInfo> {
        self.steps.values()
    }

    /// Whether every dependency of `id` is settled. `None` for unknown steps.
    pub fn deps_satisfied(&self, id: &StepId) -> Option<bool> {
        let info = self.steps.get(id)?;
        Some(ReadOnlyStateManager::new(&self.steps).deps_settled(info))
    }

    /// `Pending -> Stale | Fresh`. Returns `false` (and changes nothing) if
    /// the step is unknown or already classified.
    pub fn classify(&mut self, id: &StepId, fingerprint: Fingerprint, stale: bool) -> bool {
        let Some(info) = self.steps.get_mut(id) else {
            warn!(step = %id, "classification for unknown step; ignoring");
            return false;
        };
        if info.state != StepState::Pending {
            warn!(step = %id, state = info.state.label(), "step already classified; ignoring");
            return false;
        }

        info.fingerprint = Some(fingerprint);
        info.state = if stale {
            StepState::Stale
        } else {
            StepState::Fresh
        };
        debug!(step = %id, state = info.state.label(), "classified step");
        true
    }

    /// Ready steps up to the free worker capacity, marked `Running`.
    pub fn next_ready(&mut self) -> Vec<ScheduledStep> {
        if self.cancelled {
            return Vec::new();
        }

        let limit = self.workers.saturating_sub(self.running);
        let mut manager = StateManager::new(&mut self.steps, &self.dependents, self.run_id);
        let ready = manager.collect_new_ready_steps(limit);
        self.running += ready.len();
        ready
    }

    /// Record the outcome of a running step and return what changed,
    /// including any steps that became ready as a result.
    pub fn handle_completion(
        &mut self,
        id: &StepId,
        outcome: Result<(), StepExecutionError>,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let Some(info) = self.steps.get_mut(id) else {
            warn!(step = %id, "completion for unknown step; ignoring");
            return step;
        };
        if info.state != StepState::Running {
            warn!(step = %id, state = info.state.label(), "completion for step that is not running; ignoring");
            return step;
        }
        self.running = self.running.saturating_sub(1);

        match outcome {
            Ok(()) => {
                info.state = StepState::Succeeded;
                debug!(step = %id, run_id = self.run_id, "step succeeded");
            }
            Err(err) => {
                warn!(step = %id, run_id = self.run_id, error = %err, "step failed; skipping dependents");
                info.state = StepState::Failed(err);
                let mut manager = StateManager::new(&mut self.steps, &self.dependents, self.run_id);
                step.newly_skipped = manager.mark_dependents_skipped(id);
            }
        }

        step.newly_scheduled = self.next_ready();
        step.run_just_finished = self.is_finished();
        if step.run_just_finished {
            info!(run_id = self.run_id, "all steps terminal; run finished");
        }
        step
    }

    /// Stop dispatching. Steps not yet started become `Skipped(Cancelled)`;
    /// running steps are left to report their own completion.
    pub fn cancel(&mut self) -> SchedulerStep {
        if self.cancelled {
            return SchedulerStep {
                run_just_finished: self.is_finished(),
                ..SchedulerStep::default()
            };
        }
        self.cancelled = true;

        let mut manager = StateManager::new(&mut self.steps, &self.dependents, self.run_id);
        let newly_skipped = manager.mark_not_started_cancelled();
        info!(
            run_id = self.run_id,
            skipped = newly_skipped.len(),
            running = self.running,
            "run cancelled"
        );

        SchedulerStep {
            newly_scheduled: Vec::new(),
            newly_skipped,
            run_just_finished: self.is_finished(),
        }
    }

    /// Every step is terminal.
    pub fn is_finished(&self) -> bool {
        self.steps.values().all(|info| info.state.is_terminal())
    }
}
