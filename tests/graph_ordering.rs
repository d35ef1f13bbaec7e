use std::collections::BTreeSet;
use std::error::Error;
use std::path::Path;

use stepdag::dag::StepGraph;
use stepdag::manifest::load_and_validate;
use stepdag::step_id::StepId;
use stepdag::{StepdagError, render_graph};
use stepdag_test_utils::{ManifestBuilder, StepBuilder, diamond, ids, init_tracing};

type TestResult = Result<(), Box<dyn Error>>;

fn id(s: &str) -> StepId {
    StepId::parse(s).expect("valid id")
}

fn strs(ids: &[StepId]) -> Vec<&str> {
    ids.iter().map(StepId::as_str).collect()
}

#[test]
fn diamond_orders_dependencies_first_with_lexical_ties() {
    init_tracing();
    let graph = diamond().graph();

    let order = graph.topological_order(graph.step_ids());

    // B and C become ready together; B sorts first.
    assert_eq!(strs(&order), vec![ids::A, ids::B, ids::C, ids::D]);
}

#[test]
fn independent_roots_come_out_in_identifier_order() {
    init_tracing();
    let graph = ManifestBuilder::new()
        .step("data://meadow/zeta/2024-01-01/z", StepBuilder::new())
        .step("data://meadow/alpha/2024-01-01/a", StepBuilder::new())
        .step("data://garden/mid/2024-01-01/m", StepBuilder::new())
        .graph();

    let order = graph.topological_order(graph.step_ids());
    assert_eq!(
        strs(&order),
        vec![
            "data://garden/mid/2024-01-01/m",
            "data://meadow/alpha/2024-01-01/a",
            "data://meadow/zeta/2024-01-01/z",
        ]
    );
}

#[test]
fn order_is_restricted_to_the_closure_of_the_targets() {
    init_tracing();
    let graph = diamond().graph();

    let order = graph.topological_order([&id(ids::B)]);
    assert_eq!(strs(&order), vec![ids::A, ids::B]);

    let closure = graph.closure([&id(ids::B)]);
    let expected: BTreeSet<StepId> = [ids::SNAP, ids::A, ids::B].into_iter().map(id).collect();
    assert_eq!(closure, expected);
}

#[test]
fn downstream_excludes_the_start() {
    init_tracing();
    let graph = diamond().graph();

    let down = graph.downstream_of(&id(ids::A));
    let expected: BTreeSet<StepId> = [ids::B, ids::C, ids::D].into_iter().map(id).collect();
    assert_eq!(down, expected);

    let from_snapshot = graph.downstream_of(&id(ids::SNAP));
    assert_eq!(from_snapshot.len(), 4);
    assert!(graph.downstream_of(&id(ids::D)).is_empty());
}

#[test]
fn direct_edges_are_sorted() {
    init_tracing();
    let graph = diamond().graph();

    assert_eq!(strs(graph.dependencies_of(&id(ids::D))), vec![ids::B, ids::C]);
    assert_eq!(strs(graph.dependents_of(&id(ids::A))), vec![ids::B, ids::C]);
    assert_eq!(strs(graph.dependencies_of(&id(ids::A))), vec![ids::SNAP]);
    assert!(graph.step_dependencies_of(&id(ids::A)).is_empty());
}

#[test]
fn ranks_group_independent_steps() {
    init_tracing();
    let graph = diamond().graph();

    let order = graph.topological_order(graph.step_ids());
    let ranks = graph.ranks(&order);

    assert_eq!(ranks[&id(ids::A)], 0);
    assert_eq!(ranks[&id(ids::B)], 1);
    assert_eq!(ranks[&id(ids::C)], 1);
    assert_eq!(ranks[&id(ids::D)], 2);
}

#[test]
fn two_step_cycle_is_reported_with_its_members() {
    init_tracing();
    let manifest = ManifestBuilder::new()
        .step(ids::A, StepBuilder::new().dep(ids::B))
        .step(ids::B, StepBuilder::new().dep(ids::A))
        .build();

    let err = StepGraph::build(manifest).expect_err("cycle");

    assert_eq!(err.members.first(), err.members.last());
    let members: BTreeSet<&str> = err.members.iter().map(StepId::as_str).collect();
    assert_eq!(members, BTreeSet::from([ids::A, ids::B]));
    assert!(err.to_string().contains(" -> "));
}

#[test]
fn longer_cycle_only_reports_its_own_members() {
    init_tracing();
    // A -> B -> C -> A, with D hanging off C outside the cycle.
    let manifest = ManifestBuilder::new()
        .step(ids::A, StepBuilder::new().dep(ids::C))
        .step(ids::B, StepBuilder::new().dep(ids::A))
        .step(ids::C, StepBuilder::new().dep(ids::B))
        .step(ids::D, StepBuilder::new().dep(ids::C))
        .build();

    let err = StepGraph::build(manifest).expect_err("cycle");

    assert_eq!(err.members.len(), 4);
    assert_eq!(err.members.first(), err.members.last());
    assert!(!err.members.iter().any(|m| m.as_str() == ids::D));
}

#[test]
fn cycle_demo_is_rejected_before_anything_runs() -> TestResult {
    init_tracing();
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/cycle.toml");

    let manifest = load_and_validate(path)?;
    let err: StepdagError = StepGraph::build(manifest).expect_err("cycle").into();
    assert!(matches!(err, StepdagError::Cycle(_)));
    Ok(())
}

#[test]
fn graph_listing_shows_each_step_with_its_dependencies() {
    init_tracing();
    let graph = diamond().graph();

    let listing = render_graph(&graph);
    let lines: Vec<&str> = listing.lines().collect();

    assert_eq!(lines[0], ids::A);
    assert_eq!(lines[1], format!("    <- {} (snapshot)", ids::SNAP));
    assert!(listing.contains(&format!("    <- {} (step)", ids::B)));
    assert_eq!(listing.lines().filter(|l| !l.starts_with(' ')).count(), 4);
}
