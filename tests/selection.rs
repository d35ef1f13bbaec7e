use std::collections::BTreeSet;
use std::error::Error;

use stepdag::StepdagError;
use stepdag::select::{Selection, select_targets};
use stepdag::step_id::StepId;
use stepdag_test_utils::{ManifestBuilder, StepBuilder, diamond, ids, init_tracing};

type TestResult = Result<(), Box<dyn Error>>;

fn selecting(selectors: &[&str]) -> Selection {
    Selection {
        selectors: selectors.iter().map(|s| s.to_string()).collect(),
        ..Selection::default()
    }
}

fn set(items: &[&str]) -> BTreeSet<StepId> {
    items
        .iter()
        .map(|s| StepId::parse(s).expect("valid id"))
        .collect()
}

#[test]
fn no_selector_means_every_step() -> TestResult {
    init_tracing();
    let graph = diamond().graph();

    let targets = select_targets(&graph, &Selection::default())?;
    assert_eq!(targets, set(&[ids::A, ids::B, ids::C, ids::D]));
    Ok(())
}

#[test]
fn exact_identifier_selects_one_step() -> TestResult {
    init_tracing();
    let graph = diamond().graph();

    let targets = select_targets(&graph, &selecting(&[ids::C]))?;
    assert_eq!(targets, set(&[ids::C]));
    Ok(())
}

#[test]
fn glob_matches_canonical_identifiers() -> TestResult {
    init_tracing();
    let graph = diamond().graph();

    let targets = select_targets(&graph, &selecting(&["data://garden/*"]))?;
    assert_eq!(targets, set(&[ids::B, ids::C]));
    Ok(())
}

#[test]
fn plain_text_matches_as_substring() -> TestResult {
    init_tracing();
    let graph = diamond().graph();

    let targets = select_targets(&graph, &selecting(&["gho_regions"]))?;
    assert_eq!(targets, set(&[ids::C]));

    let targets = select_targets(&graph, &selecting(&["grapher", "meadow"]))?;
    assert_eq!(targets, set(&[ids::A, ids::D]));
    Ok(())
}

#[test]
fn downstream_adds_every_dependent() -> TestResult {
    init_tracing();
    let graph = diamond().graph();

    let selection = Selection {
        selectors: vec![ids::B.to_string()],
        downstream: true,
        ..Selection::default()
    };
    assert_eq!(select_targets(&graph, &selection)?, set(&[ids::B, ids::D]));
    Ok(())
}

#[test]
fn snapshot_with_downstream_selects_its_consumers() -> TestResult {
    init_tracing();
    let graph = diamond()
        .snapshot("snapshot://un/2024-03-01/population.csv", "cc33")
        .step(
            "data://meadow/un/2024-03-01/population",
            StepBuilder::new().dep("snapshot://un/2024-03-01/population.csv"),
        )
        .graph();

    let selection = Selection {
        selectors: vec!["snapshot://un/2024-03-01/population.csv".to_string()],
        downstream: true,
        ..Selection::default()
    };
    assert_eq!(
        select_targets(&graph, &selection)?,
        set(&["data://meadow/un/2024-03-01/population"])
    );
    Ok(())
}

#[test]
fn snapshot_without_downstream_is_an_error() {
    init_tracing();
    let graph = diamond().graph();

    let err = select_targets(&graph, &selecting(&[ids::SNAP])).expect_err("snapshot");
    assert!(matches!(err, StepdagError::Selection(_)));
    assert!(err.to_string().contains("--downstream"));
}

#[test]
fn selector_matching_nothing_is_an_error() {
    init_tracing();
    let graph = diamond().graph();

    let err = select_targets(&graph, &selecting(&["data://garden/unknown/*"]))
        .expect_err("no match");
    assert!(err.to_string().contains("matches no step"));

    let err = select_targets(&graph, &selecting(&["data://garden/who/2024-01-01/nope"]))
        .expect_err("unknown exact id");
    assert!(err.to_string().contains("matches no step"));
}

#[test]
fn exclusions_are_applied_after_expansion() -> TestResult {
    init_tracing();
    let graph = diamond().graph();

    let selection = Selection {
        selectors: vec![ids::A.to_string()],
        exclude: vec!["data://garden/*".to_string()],
        downstream: true,
    };
    assert_eq!(select_targets(&graph, &selection)?, set(&[ids::A, ids::D]));
    Ok(())
}

#[test]
fn excluding_everything_is_an_error() {
    init_tracing();
    let graph = diamond().graph();

    let selection = Selection {
        selectors: vec!["data://garden/*".to_string()],
        exclude: vec!["garden".to_string()],
        downstream: false,
    };
    let err = select_targets(&graph, &selection).expect_err("empty");
    assert!(err.to_string().contains("every selected step was excluded"));
}

#[test]
fn manifest_without_steps_says_so() {
    init_tracing();
    let graph = ManifestBuilder::new().snapshot(ids::SNAP, "aa11").graph();

    let err = select_targets(&graph, &Selection::default()).expect_err("nothing to build");
    assert!(err.to_string().contains("manifest defines no steps"), "{err}");
}

#[test]
fn downstream_of_an_unused_snapshot_matches_nothing_buildable() {
    init_tracing();
    let graph = ManifestBuilder::new()
        .snapshot(ids::SNAP, "aa11")
        .step(ids::A, StepBuilder::new().seed("a"))
        .graph();

    let selection = Selection {
        selectors: vec![ids::SNAP.to_string()],
        downstream: true,
        ..Selection::default()
    };
    let err = select_targets(&graph, &selection).expect_err("no dependents");
    assert!(err.to_string().contains("matched no buildable step"), "{err}");
}

#[test]
fn invalid_glob_is_reported() {
    init_tracing();
    let graph = diamond().graph();

    let err = select_targets(&graph, &selecting(&["data://[garden"])).expect_err("bad glob");
    assert!(err.to_string().contains("invalid pattern"));
}
