use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use stepdag::errors::ManifestError;
use stepdag::manifest::{Dependency, load_and_validate, load_manifests, parse_str};
use stepdag::step_id::StepId;
use stepdag::types::StateStorageMode;
use stepdag_test_utils::{ManifestBuilder, StepBuilder, diamond, ids, init_tracing};
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn Error>>;

fn demo(path: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("demos").join(path)
}

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write manifest");
    path
}

fn id(s: &str) -> StepId {
    StepId::parse(s).expect("valid id")
}

#[test]
fn demo_manifest_loads_with_includes() -> TestResult {
    init_tracing();

    let manifest = load_and_validate(demo("etl/dag.toml"))?;

    assert_eq!(manifest.snapshots().len(), 2);
    assert_eq!(manifest.steps().len(), 5);
    assert_eq!(manifest.config.workers, 2);

    let garden = manifest
        .step(&id("data://garden/who/2024-01-01/gho"))
        .ok_or("garden step missing")?;
    assert_eq!(garden.deps.len(), 2);
    assert!(garden.origin.ends_with("garden.toml"));
    assert!(garden.outputs[0].ends_with("out/garden/gho.txt"));
    assert_eq!(garden.params.get("year_min").and_then(|v| v.as_integer()), Some(1990));

    let meadow = manifest
        .step(&id("data://meadow/who/2024-01-01/gho"))
        .ok_or("meadow step missing")?;
    assert_eq!(
        meadow.deps,
        vec![Dependency::Snapshot(id("snapshot://who/2024-01-01/gho.csv"))]
    );
    Ok(())
}

#[test]
fn steps_in_different_files_merge_into_one_namespace() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;

    let first = write(
        dir.path(),
        "a.toml",
        r#"
[snapshot."snapshot://who/2024-01-01/gho.csv"]
hash = "aa11"

[step."data://meadow/who/2024-01-01/gho"]
deps = ["snapshot://who/2024-01-01/gho.csv"]
"#,
    );
    let second = write(
        dir.path(),
        "b.toml",
        r#"
# depends on a step declared in a.toml
[step."data://garden/who/2024-01-01/gho"]
deps = ["data://meadow/who/2024-01-01/gho"]
"#,
    );

    let manifest = load_manifests(&[first, second])?;

    let garden = manifest.step(&id(ids::B)).ok_or("garden missing")?;
    assert_eq!(garden.deps, vec![Dependency::Step(id(ids::A))]);
    Ok(())
}

#[test]
fn identifier_defined_in_two_files_is_rejected() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;

    let body = r#"
[step."data://meadow/who/2024-01-01/gho"]
cmd = "true"
"#;
    let first = write(dir.path(), "a.toml", body);
    let second = write(dir.path(), "b.toml", body);

    let err = load_manifests(&[first, second]).expect_err("duplicate must fail");
    match err {
        ManifestError::Duplicate { id, first, second } => {
            assert_eq!(id, ids::A);
            assert!(first.ends_with("a.toml"));
            assert!(second.ends_with("b.toml"));
        }
        other => panic!("expected Duplicate, got {other:?}"),
    }
    Ok(())
}

#[test]
fn declaring_under_the_wrong_section_is_rejected() {
    init_tracing();

    let err = ManifestBuilder::new()
        .step(ids::SNAP, StepBuilder::new())
        .try_build()
        .expect_err("snapshot scheme declared as step");
    assert!(matches!(err, ManifestError::WrongKind { declared_as: "step", .. }));

    let err = ManifestBuilder::new()
        .snapshot(ids::A, "aa11")
        .try_build()
        .expect_err("step scheme declared as snapshot");
    assert!(matches!(err, ManifestError::WrongKind { declared_as: "snapshot", .. }));
}

#[test]
fn unresolved_dependency_names_both_sides() {
    init_tracing();

    let err = ManifestBuilder::new()
        .step(ids::B, StepBuilder::new().dep(ids::A))
        .try_build()
        .expect_err("unknown dep");

    match err {
        ManifestError::UnresolvedDependency { step, dep } => {
            assert_eq!(step.as_str(), ids::B);
            assert_eq!(dep.as_str(), ids::A);
        }
        other => panic!("expected UnresolvedDependency, got {other:?}"),
    }
}

#[test]
fn self_dependency_is_rejected() {
    init_tracing();

    let err = ManifestBuilder::new()
        .step(ids::A, StepBuilder::new().dep(ids::A))
        .try_build()
        .expect_err("self dep");
    assert!(matches!(err, ManifestError::SelfDependency(ref s) if s.as_str() == ids::A));
}

#[test]
fn duplicate_dependency_entry_is_rejected() {
    init_tracing();

    let err = diamond()
        .step(
            "data://garden/who/2024-01-01/twice",
            StepBuilder::new().dep(ids::A).dep(ids::A),
        )
        .try_build()
        .expect_err("dep listed twice");
    assert!(matches!(err, ManifestError::Invalid { .. }));
}

#[test]
fn malformed_identifier_reports_the_file() {
    init_tracing();

    let err = ManifestBuilder::new()
        .at("/proj/broken.toml")
        .step("data://garden/who/yesterday/gho", StepBuilder::new())
        .try_build()
        .expect_err("bad version token");

    match err {
        ManifestError::InvalidIdentifier { path, source } => {
            assert_eq!(path, PathBuf::from("/proj/broken.toml"));
            assert!(source.reason.contains("version"), "reason: {}", source.reason);
        }
        other => panic!("expected InvalidIdentifier, got {other:?}"),
    }
}

#[test]
fn malformed_snapshot_hash_is_rejected() {
    init_tracing();

    let err = ManifestBuilder::new()
        .snapshot(ids::SNAP, "not-a-hash")
        .try_build()
        .expect_err("non-hex hash");
    assert!(err.to_string().contains("malformed content hash"));
}

#[test]
fn snapshot_hash_is_stored_in_lowercase() -> TestResult {
    init_tracing();

    let manifest = ManifestBuilder::new().snapshot(ids::SNAP, " AA11 ").try_build()?;
    let snap = manifest.snapshot(&StepId::parse(ids::SNAP)?).ok_or("snapshot missing")?;
    assert_eq!(snap.hash, "aa11");
    Ok(())
}

#[test]
fn invalid_sources_glob_is_rejected() {
    init_tracing();

    let err = ManifestBuilder::new()
        .step(ids::A, StepBuilder::new().source("steps/[unclosed"))
        .try_build()
        .expect_err("bad glob");
    assert!(err.to_string().contains("invalid sources pattern"));
}

#[test]
fn comments_and_whitespace_are_ignored() -> TestResult {
    init_tracing();

    let raw = parse_str(
        "inline.toml",
        r#"
# leading comment

   [step."data://meadow/who/2024-01-01/gho"]   # trailing comment
   deps = [
       # nothing here yet
   ]
   cmd = "true"
"#,
    )?;
    assert_eq!(raw.step.len(), 1);
    Ok(())
}

#[test]
fn unknown_keys_are_parse_errors() {
    init_tracing();

    let err = parse_str(
        "typo.toml",
        r#"
[step."data://meadow/who/2024-01-01/gho"]
dependencies = []
"#,
    )
    .expect_err("unknown field");
    assert!(matches!(err, ManifestError::Parse { ref path, .. } if path.ends_with("typo.toml")));
}

#[test]
fn missing_manifest_file_is_an_io_error() {
    init_tracing();

    let err = load_and_validate("/definitely/not/here/dag.toml").expect_err("missing file");
    assert!(matches!(err, ManifestError::Io { .. }));
}

#[test]
fn included_file_reached_twice_is_loaded_once() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;

    write(
        dir.path(),
        "shared.toml",
        r#"
[snapshot."snapshot://who/2024-01-01/gho.csv"]
hash = "aa11"
"#,
    );
    let a = write(
        dir.path(),
        "a.toml",
        r#"
include = ["shared.toml"]

[step."data://meadow/who/2024-01-01/gho"]
deps = ["snapshot://who/2024-01-01/gho.csv"]
"#,
    );
    let b = write(
        dir.path(),
        "b.toml",
        r#"
include = ["shared.toml"]

[step."data://garden/who/2024-01-01/gho"]
deps = ["data://meadow/who/2024-01-01/gho"]
"#,
    );

    let manifest = load_manifests(&[a, b])?;
    assert_eq!(manifest.snapshots().len(), 1);
    assert_eq!(manifest.steps().len(), 2);
    Ok(())
}

#[test]
fn config_defaults_and_conflicts() -> TestResult {
    init_tracing();
    let dir = TempDir::new()?;

    let plain = write(
        dir.path(),
        "plain.toml",
        r#"
[step."data://meadow/who/2024-01-01/gho"]
"#,
    );
    let manifest = load_manifests(&[plain.clone()])?;
    assert_eq!(manifest.config.workers, 4);
    assert_eq!(manifest.config.state_dir, dir.path().join(".stepdag"));
    assert_eq!(manifest.config.state_storage, StateStorageMode::File);

    let one = write(
        dir.path(),
        "one.toml",
        r#"
[config]
workers = 2
state_storage = "memory"
"#,
    );
    let manifest = load_manifests(&[one.clone(), plain])?;
    assert_eq!(manifest.config.workers, 2);
    assert_eq!(manifest.config.state_storage, StateStorageMode::Memory);

    let other = write(
        dir.path(),
        "other.toml",
        r#"
[config]
workers = 8
"#,
    );
    let err = load_manifests(&[one, other]).expect_err("conflicting config");
    assert!(err.to_string().contains("[config] conflicts"));
    Ok(())
}

#[test]
fn zero_workers_is_rejected() {
    init_tracing();

    let err = ManifestBuilder::new()
        .workers(0)
        .step(ids::A, StepBuilder::new())
        .try_build()
        .expect_err("workers = 0");
    assert!(err.to_string().contains("workers must be >= 1"));
}

#[test]
fn outputs_resolve_against_the_declaring_file() -> TestResult {
    init_tracing();

    let manifest = ManifestBuilder::new()
        .at("/proj/sub/dag.toml")
        .step(ids::A, StepBuilder::new().output("out/a.txt"))
        .try_build()?;

    let step = manifest.step(&id(ids::A)).ok_or("missing")?;
    assert_eq!(step.outputs, vec![PathBuf::from("/proj/sub/out/a.txt")]);
    assert_eq!(step.base_dir, PathBuf::from("/proj/sub"));
    Ok(())
}
