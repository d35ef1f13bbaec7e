// src/engine/plan.rs

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::debug;

use crate::dag::StepGraph;
use crate::errors::Result;
use crate::fingerprint::{Fingerprint, FingerprintCache, FingerprintEngine};
use crate::fs::FileSystem;
use crate::state::{OutputCheck, Staleness, StateStore};
use crate::step_id::StepId;

/// One step of a [`BuildPlan`].
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub id: StepId,
    pub fingerprint: Fingerprint,
    pub staleness: Staleness,
    /// Selected target re-run under `--force` even if fresh.
    pub forced: bool,
    /// Topological rank within the plan; steps of one rank are independent.
    pub rank: usize,
}

impl PlannedStep {
    pub fn will_run(&self) -> bool {
        self.forced || self.staleness.is_stale()
    }

    /// Human-readable reason for the decision.
    pub fn reason(&self) -> String {
        match (&self.staleness, self.forced) {
            (Staleness::Fresh, true) => "forced".to_string(),
            (staleness, _) => staleness.to_string(),
        }
    }
}

/// Closure of the targets in topological order, each step fingerprinted and
/// classified against the state store.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub targets: BTreeSet<StepId>,
    steps: Vec<PlannedStep>,
    index: BTreeMap<StepId, usize>,
    /// Fingerprints actually computed (shared ancestors count once).
    pub fingerprints_computed: usize,
}

impl BuildPlan {
    /// Fingerprint every step in the closure of `targets` and ask `store`
    /// whether it is stale. Reads the store, never writes it.
    pub fn compute(
        graph: &StepGraph,
        targets: &BTreeSet<StepId>,
        store: &dyn StateStore,
        fs: Arc<dyn FileSystem>,
        force: bool,
    ) -> Result<Self> {
        let order = graph.topological_order(targets.iter());
        let ranks = graph.ranks(&order);

        let mut engine = FingerprintEngine::new(fs.clone());
        let mut cache = FingerprintCache::new();
        let fingerprints = engine.fingerprint_all(order.iter(), graph, &mut cache)?;

        let mut steps = Vec::with_capacity(order.len());
        let mut index = BTreeMap::new();

        for id in order {
            let Some(fingerprint) = fingerprints.get(&id).cloned() else {
                continue;
            };
            let outputs = graph
                .manifest()
                .step(&id)
                .map(|s| s.outputs.as_slice())
                .unwrap_or(&[]);

            let staleness = store.staleness(&id, &fingerprint, OutputCheck::new(fs.as_ref(), outputs));
            let forced = force && targets.contains(&id);

            debug!(
                step = %id,
                fingerprint = %fingerprint.short(),
                staleness = %staleness,
                forced,
                "planned step"
            );

            index.insert(id.clone(), steps.len());
            steps.push(PlannedStep {
                rank: ranks.get(&id).copied().unwrap_or(0),
                id,
                fingerprint,
                staleness,
                forced,
            });
        }

        Ok(Self {
            targets: targets.clone(),
            steps,
            index,
            fingerprints_computed: cache.total_computations(),
        })
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[PlannedStep] {
        &self.steps
    }

    pub fn get(&self, id: &StepId) -> Option<&PlannedStep> {
        self.index.get(id).map(|i| &self.steps[*i])
    }

    pub fn ids(&self) -> impl Iterator<Item = &StepId> {
        self.steps.iter().map(|s| &s.id)
    }

    pub fn to_run(&self) -> impl Iterator<Item = &PlannedStep> {
        self.steps.iter().filter(|s| s.will_run())
    }

    pub fn run_count(&self) -> usize {
        self.to_run().count()
    }

    pub fn fresh_count(&self) -> usize {
        self.steps.len() - self.run_count()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Listing printed by `--dry-run`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "plan: {} step(s), {} to run, {} fresh",
            self.steps.len(),
            self.run_count(),
            self.fresh_count()
        );
        for step in &self.steps {
            let marker = if step.will_run() { "run  " } else { "fresh" };
            let _ = writeln!(
                out,
                "  [{marker}] {:<3} {}  {}  ({})",
                step.rank,
                step.id,
                step.fingerprint.short(),
                step.reason()
            );
        }
        out
    }
}
