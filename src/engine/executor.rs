// src/engine/executor.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::task::{Id as TaskId, JoinSet};
use tracing::{debug, error, info, warn};

use crate::dag::{ScheduledStep, Scheduler, StepGraph, StepState};
use crate::engine::cancel::CancelSignal;
use crate::engine::plan::BuildPlan;
use crate::engine::report::{BuildReport, StepReport};
use crate::errors::{Result, StepExecutionError};
use crate::exec::{ResolvedDependency, StepRequest, StepRunner, verify_outputs};
use crate::fingerprint::Fingerprint;
use crate::fs::FileSystem;
use crate::manifest::Dependency;
use crate::state::{BuildRecord, StateStore};
use crate::step_id::StepId;

#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    /// Maximum number of steps running at once.
    pub workers: usize,
    /// Re-run targets even when fresh.
    pub force: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            force: false,
        }
    }
}

/// What a spawned step task hands back to the coordinating loop.
struct Completion {
    id: StepId,
    outcome: std::result::Result<Option<String>, StepExecutionError>,
    duration_ms: u64,
}

/// Mutable bookkeeping of one `execute` call.
#[derive(Default)]
struct RunState {
    tasks: JoinSet<Completion>,
    in_flight: HashMap<TaskId, StepId>,
    /// Output checksums of dependencies, filled from completions and the store.
    checksums: HashMap<StepId, Option<String>>,
    durations: HashMap<StepId, u64>,
}

/// Drives a build: plans the closure of the targets, then runs stale steps
/// through the [`StepRunner`] in dependency order with bounded parallelism,
/// recording successes in the [`StateStore`].
///
/// The per-run semantics live in the pure [`Scheduler`]; this type is the
/// async shell that spawns runner calls and feeds their completions back.
pub struct Executor {
    store: Arc<dyn StateStore>,
    runner: Arc<dyn StepRunner>,
    fs: Arc<dyn FileSystem>,
    options: ExecutorOptions,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("store", &self.store)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Executor {
    pub fn new(
        store: Arc<dyn StateStore>,
        runner: Arc<dyn StepRunner>,
        fs: Arc<dyn FileSystem>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            store,
            runner,
            fs,
            options,
        }
    }

    pub fn options(&self) -> ExecutorOptions {
        self.options
    }

    /// Fingerprint and classify the closure of `targets` without running anything.
    pub fn plan(&self, graph: &StepGraph, targets: &BTreeSet<StepId>) -> Result<BuildPlan> {
        BuildPlan::compute(
            graph,
            targets,
            self.store.as_ref(),
            self.fs.clone(),
            self.options.force,
        )
    }

    /// Plan and execute.
    pub async fn run(
        &self,
        graph: &StepGraph,
        targets: &BTreeSet<StepId>,
        cancel: CancelSignal,
    ) -> Result<BuildReport> {
        let plan = self.plan(graph, targets)?;
        self.execute(graph, &plan, cancel).await
    }

    /// Execute a previously computed plan.
    pub async fn execute(
        &self,
        graph: &StepGraph,
        plan: &BuildPlan,
        cancel: CancelSignal,
    ) -> Result<BuildReport> {
        let started = Instant::now();
        let run_id = Utc::now().timestamp_millis().max(0) as u64;

        let mut scheduler = Scheduler::new(graph, plan.ids(), self.options.workers, run_id);
        for step in plan.steps() {
            scheduler.classify(&step.id, step.fingerprint.clone(), step.will_run());
        }

        info!(
            run_id,
            steps = plan.steps().len(),
            to_run = plan.run_count(),
            workers = self.options.workers,
            "starting build"
        );

        let mut run = RunState::default();

        if cancel.is_cancelled() {
            scheduler.cancel();
        }
        let ready = scheduler.next_ready();
        self.launch(graph, plan, &mut scheduler, ready, &mut run, &cancel);

        while !scheduler.is_finished() {
            if run.tasks.is_empty() && !scheduler.is_cancelled() {
                error!(run_id, "no step running and none ready; stopping");
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled(), if !scheduler.is_cancelled() => {
                    let step = scheduler.cancel();
                    info!(run_id, skipped = step.newly_skipped.len(), "stopped dispatching new steps");
                }

                joined = run.tasks.join_next_with_id(), if !run.tasks.is_empty() => {
                    let Some(joined) = joined else { continue };
                    let completion = match joined {
                        Ok((task_id, completion)) => {
                            run.in_flight.remove(&task_id);
                            completion
                        }
                        Err(join_err) => {
                            let Some(id) = run.in_flight.remove(&join_err.id()) else {
                                error!(error = %join_err, "unknown step task ended abnormally");
                                continue;
                            };
                            error!(step = %id, error = %join_err, "step task panicked");
                            Completion {
                                id,
                                outcome: Err(StepExecutionError::Runner(join_err.to_string())),
                                duration_ms: 0,
                            }
                        }
                    };

                    run.durations.insert(completion.id.clone(), completion.duration_ms);
                    let outcome = match completion.outcome {
                        Ok(checksum) => {
                            info!(
                                step = %completion.id,
                                run_id,
                                elapsed_ms = completion.duration_ms,
                                "step succeeded"
                            );
                            run.checksums.insert(completion.id.clone(), checksum);
                            Ok(())
                        }
                        Err(err) => {
                            warn!(step = %completion.id, run_id, error = %err, "step failed");
                            Err(err)
                        }
                    };

                    let step = scheduler.handle_completion(&completion.id, outcome);
                    self.launch(graph, plan, &mut scheduler, step.newly_scheduled, &mut run, &cancel);
                }

                else => break,
            }
        }

        let report = BuildReport {
            run_id,
            steps: plan
                .steps()
                .iter()
                .map(|planned| StepReport {
                    id: planned.id.clone(),
                    state: scheduler
                        .state_of(&planned.id)
                        .cloned()
                        .unwrap_or(StepState::Pending),
                    fingerprint: Some(planned.fingerprint.clone()),
                    duration_ms: run.durations.get(&planned.id).copied(),
                    reason: planned.reason(),
                })
                .collect(),
            cancelled: scheduler.is_cancelled(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            run_id,
            succeeded = report.succeeded().len(),
            fresh = report.fresh().len(),
            skipped = report.skipped().len(),
            failed = report.failed().len(),
            elapsed_ms = report.elapsed_ms,
            "build finished"
        );
        Ok(report)
    }

    /// Spawn every ready step. A step whose request cannot be assembled
    /// fails on the spot, which may in turn make other steps ready.
    fn launch(
        &self,
        graph: &StepGraph,
        plan: &BuildPlan,
        scheduler: &mut Scheduler,
        mut ready: Vec<ScheduledStep>,
        run: &mut RunState,
        cancel: &CancelSignal,
    ) {
        while !ready.is_empty() {
            let mut next = Vec::new();
            for scheduled in ready {
                match self.build_request(graph, plan, &scheduled, &mut run.checksums) {
                    Some(request) => self.spawn_step(request, run, cancel),
                    None => {
                        let err = StepExecutionError::Runner(format!(
                            "step '{}' is not defined in the manifest",
                            scheduled.id
                        ));
                        next.extend(scheduler.handle_completion(&scheduled.id, Err(err)).newly_scheduled);
                    }
                }
            }
            ready = next;
        }
    }

    fn spawn_step(&self, request: StepRequest, run: &mut RunState, cancel: &CancelSignal) {
        debug!(step = %request.id, run_id = request.run_id, "dispatching step");

        let id = request.id.clone();
        let future = self.runner.run(request.clone(), cancel.clone());
        let store = self.store.clone();
        let fs = self.fs.clone();

        let handle = run.tasks.spawn(async move {
            let started = Instant::now();
            let step = request.id.clone();
            let outcome = match future.await {
                Ok(output) => {
                    record_success(
                        store,
                        fs,
                        request.id,
                        request.fingerprint,
                        request.outputs,
                        output.checksum,
                        started,
                    )
                    .await
                }
                Err(err) => Err(err),
            };
            Completion {
                id: step,
                outcome,
                duration_ms: started.elapsed().as_millis() as u64,
            }
        });
        run.in_flight.insert(handle.id(), id);
    }

    fn build_request(
        &self,
        graph: &StepGraph,
        plan: &BuildPlan,
        scheduled: &ScheduledStep,
        checksums: &mut HashMap<StepId, Option<String>>,
    ) -> Option<StepRequest> {
        let manifest = graph.manifest();
        let Some(def) = manifest.step(&scheduled.id) else {
            error!(step = %scheduled.id, "scheduled step missing from manifest");
            return None;
        };

        let mut deps = BTreeMap::new();
        for dep in &def.deps {
            let resolved = match dep {
                Dependency::Snapshot(id) => match manifest.snapshot(id) {
                    Some(snap) => ResolvedDependency::Snapshot {
                        hash: snap.hash.clone(),
                        size: snap.size,
                    },
                    None => continue,
                },
                Dependency::Step(id) => {
                    let output_checksum = checksums
                        .entry(id.clone())
                        .or_insert_with(|| self.recorded_checksum(id))
                        .clone();
                    let Some(planned) = plan.get(id) else {
                        warn!(step = %scheduled.id, dep = %id, "dependency missing from plan");
                        continue;
                    };
                    ResolvedDependency::Step {
                        fingerprint: planned.fingerprint.clone(),
                        output_checksum,
                        outputs: manifest
                            .step(id)
                            .map(|d| d.outputs.clone())
                            .unwrap_or_default(),
                    }
                }
            };
            deps.insert(dep.id().clone(), resolved);
        }

        Some(StepRequest {
            id: scheduled.id.clone(),
            run_id: scheduled.run_id,
            fingerprint: scheduled.fingerprint.clone(),
            cmd: def.cmd.clone(),
            params: def.params.clone(),
            outputs: def.outputs.clone(),
            workdir: def.base_dir.clone(),
            deps,
        })
    }

    fn recorded_checksum(&self, id: &StepId) -> Option<String> {
        match self.store.get(id) {
            Ok(record) => record.and_then(|r| r.output_checksum),
            Err(err) => {
                warn!(
                    step = %id,
                    error = %err,
                    "build record unreadable; dependency checksum unknown"
                );
                None
            }
        }
    }
}

/// Verify outputs and write the build record off the async threads.
async fn record_success(
    store: Arc<dyn StateStore>,
    fs: Arc<dyn FileSystem>,
    id: StepId,
    fingerprint: Fingerprint,
    outputs: Vec<PathBuf>,
    reported: Option<String>,
    started: Instant,
) -> std::result::Result<Option<String>, StepExecutionError> {
    let joined = tokio::task::spawn_blocking(move || -> std::result::Result<_, StepExecutionError> {
        let checksum = verify_outputs(fs.as_ref(), &outputs, reported.as_deref())?;
        let record = BuildRecord::succeeded(
            id.clone(),
            fingerprint,
            checksum.clone(),
            started.elapsed().as_millis() as u64,
        );
        store
            .put(&id, &record)
            .map_err(|e| StepExecutionError::StateWrite(e.to_string()))?;
        Ok(checksum)
    })
    .await;

    match joined {
        Ok(result) => result,
        Err(e) => Err(StepExecutionError::Runner(format!("recording task failed: {e}"))),
    }
}
