use std::collections::{BTreeSet, HashMap, VecDeque};

use proptest::prelude::*;
use stepdag::dag::{ScheduledStep, Scheduler, SkipReason, StepGraph, StepState};
use stepdag::errors::StepExecutionError;
use stepdag::fingerprint::Fingerprint;
use stepdag::step_id::StepId;
use stepdag_test_utils::{ManifestBuilder, StepBuilder};

fn step_name(i: usize) -> String {
    format!("data://garden/prop/2024-01-01/s{i:02}")
}

#[derive(Debug, Clone)]
struct Case {
    /// deps[i] only contains indices below i, so the graph is acyclic.
    deps: Vec<BTreeSet<usize>>,
    fresh: Vec<bool>,
    fails: Vec<bool>,
    workers: usize,
}

impl Case {
    fn graph(&self) -> StepGraph {
        let mut builder = ManifestBuilder::new();
        for (i, deps) in self.deps.iter().enumerate() {
            let mut step = StepBuilder::new().seed(&format!("seed-{i}"));
            for dep in deps {
                step = step.dep(&step_name(*dep));
            }
            builder = builder.step(&step_name(i), step);
        }
        builder.graph()
    }
}

fn case_strategy(max_steps: usize) -> impl Strategy<Value = Case> {
    (1..=max_steps).prop_flat_map(|n| {
        (
            prop::collection::vec(prop::collection::vec(any::<usize>(), 0..4), n),
            prop::collection::vec(prop::bool::weighted(0.25), n),
            prop::collection::vec(prop::bool::weighted(0.2), n),
            1usize..4,
        )
            .prop_map(|(raw, fresh, fails, workers)| {
                let deps = raw
                    .into_iter()
                    .enumerate()
                    .map(|(i, candidates)| {
                        if i == 0 {
                            BTreeSet::new()
                        } else {
                            candidates.into_iter().map(|c| c % i).collect()
                        }
                    })
                    .collect();
                Case {
                    deps,
                    fresh,
                    fails,
                    workers,
                }
            })
    })
}

struct Outcome {
    scheduler: Scheduler,
    /// Steps in the order their completion was reported.
    completed: Vec<StepId>,
    max_running: usize,
}

/// Drive the scheduler to the end, completing steps in dispatch order.
fn drive(case: &Case, graph: &StepGraph, index: &HashMap<StepId, usize>) -> Outcome {
    let mut scheduler = Scheduler::new(graph, graph.step_ids(), case.workers, 7);
    for (id, i) in index {
        let fp = Fingerprint::from_content_hash(&format!("{i:x}"));
        scheduler.classify(id, fp, !case.fresh[*i]);
    }

    let mut queue: VecDeque<ScheduledStep> = scheduler.next_ready().into();
    let mut completed = Vec::new();
    let mut max_running = scheduler.running_count();

    while let Some(step) = queue.pop_front() {
        let outcome = if case.fails[index[&step.id]] {
            Err(StepExecutionError::ExitStatus(1))
        } else {
            Ok(())
        };
        let result = scheduler.handle_completion(&step.id, outcome);
        completed.push(step.id);
        queue.extend(result.newly_scheduled);
        max_running = max_running.max(scheduler.running_count());
    }

    Outcome {
        scheduler,
        completed,
        max_running,
    }
}

fn ancestors(case: &Case, i: usize) -> BTreeSet<usize> {
    let mut out = BTreeSet::new();
    let mut stack: Vec<usize> = case.deps[i].iter().copied().collect();
    while let Some(d) = stack.pop() {
        if out.insert(d) {
            stack.extend(case.deps[d].iter().copied());
        }
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn every_run_terminates_with_all_steps_terminal(case in case_strategy(12)) {
        let graph = case.graph();
        let index: HashMap<StepId, usize> =
            graph.step_ids().cloned().enumerate().map(|(i, id)| (id, i)).collect();

        let outcome = drive(&case, &graph, &index);

        prop_assert!(outcome.scheduler.is_finished());
        prop_assert_eq!(outcome.scheduler.running_count(), 0);
        prop_assert!(outcome.max_running <= case.workers);
        for info in outcome.scheduler.steps() {
            prop_assert!(info.state.is_terminal(), "{} is {:?}", info.id, info.state);
        }
    }

    #[test]
    fn steps_only_run_after_their_dependencies_settle(case in case_strategy(12)) {
        let graph = case.graph();
        let index: HashMap<StepId, usize> =
            graph.step_ids().cloned().enumerate().map(|(i, id)| (id, i)).collect();

        let outcome = drive(&case, &graph, &index);
        let position: HashMap<&StepId, usize> =
            outcome.completed.iter().enumerate().map(|(p, id)| (id, p)).collect();

        for (pos, id) in outcome.completed.iter().enumerate() {
            for dep in graph.step_dependencies_of(id) {
                let state = outcome.scheduler.state_of(dep);
                match state {
                    Some(StepState::Fresh) => {}
                    Some(StepState::Succeeded) => {
                        prop_assert!(position[dep] < pos, "{} ran before {}", id, dep);
                    }
                    other => prop_assert!(false, "{} ran although {} is {:?}", id, dep, other),
                }
            }
        }
    }

    #[test]
    fn failures_skip_every_descendant_that_has_not_run(case in case_strategy(12)) {
        let graph = case.graph();
        let index: HashMap<StepId, usize> =
            graph.step_ids().cloned().enumerate().map(|(i, id)| (id, i)).collect();

        let outcome = drive(&case, &graph, &index);

        for (id, &i) in &index {
            let state = outcome.scheduler.state_of(id).cloned();
            let failed_ancestor = ancestors(&case, i).into_iter().any(|a| {
                matches!(
                    outcome.scheduler.state_of(&StepId::parse(&step_name(a)).expect("id")),
                    Some(StepState::Failed(_))
                )
            });

            if failed_ancestor {
                match state {
                    Some(StepState::Skipped(SkipReason::UpstreamFailed(upstream))) => {
                        let u = index[&upstream];
                        prop_assert!(ancestors(&case, i).contains(&u));
                        prop_assert!(case.fails[u] && !case.fresh[u]);
                    }
                    other => prop_assert!(false, "{} should be skipped, is {:?}", id, other),
                }
            } else if case.fresh[i] {
                prop_assert_eq!(state, Some(StepState::Fresh));
            } else if case.fails[i] {
                prop_assert_eq!(state, Some(StepState::Failed(StepExecutionError::ExitStatus(1))));
            } else {
                prop_assert_eq!(state, Some(StepState::Succeeded));
            }
        }
    }
}

#[test]
fn cancel_skips_everything_not_yet_dispatched() {
    let case = Case {
        deps: vec![BTreeSet::new(), BTreeSet::from([0]), BTreeSet::from([1]), BTreeSet::new()],
        fresh: vec![false; 4],
        fails: vec![false; 4],
        workers: 1,
    };
    let graph = case.graph();
    let mut scheduler = Scheduler::new(&graph, graph.step_ids(), 1, 1);
    for (i, id) in graph.step_ids().enumerate() {
        scheduler.classify(id, Fingerprint::from_content_hash(&format!("{i}")), true);
    }

    let first = scheduler.next_ready();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id.as_str(), step_name(0));

    let step = scheduler.cancel();
    assert_eq!(step.newly_skipped.len(), 3);
    assert!(!step.run_just_finished);
    assert!(scheduler.next_ready().is_empty());

    let done = scheduler.handle_completion(&first[0].id, Ok(()));
    assert!(done.newly_scheduled.is_empty());
    assert!(done.run_just_finished);
    assert_eq!(scheduler.state_of(&first[0].id), Some(&StepState::Succeeded));
}

#[test]
fn fresh_steps_count_as_settled_for_their_dependents() {
    let case = Case {
        deps: vec![BTreeSet::new(), BTreeSet::from([0])],
        fresh: vec![true, false],
        fails: vec![false; 2],
        workers: 2,
    };
    let graph = case.graph();
    let mut scheduler = Scheduler::new(&graph, graph.step_ids(), 2, 1);
    let ids: Vec<StepId> = graph.step_ids().cloned().collect();
    scheduler.classify(&ids[0], Fingerprint::from_content_hash("0"), false);
    scheduler.classify(&ids[1], Fingerprint::from_content_hash("1"), true);

    assert_eq!(scheduler.deps_satisfied(&ids[1]), Some(true));
    let ready = scheduler.next_ready();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].id, ids[1]);
    assert_eq!(ready[0].run_id, 1);

    // A second classification is ignored.
    assert!(!scheduler.classify(&ids[0], Fingerprint::from_content_hash("x"), true));
}
