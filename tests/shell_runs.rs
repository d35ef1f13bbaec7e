#![cfg(unix)]

use std::collections::BTreeSet;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use stepdag::cli::CliArgs;
use stepdag::dag::{StepGraph, StepState};
use stepdag::engine::{CancelSignal, Executor, ExecutorOptions};
use stepdag::errors::StepExecutionError;
use stepdag::exec::CommandRunner;
use stepdag::fs::RealFileSystem;
use stepdag::manifest::load_and_validate;
use stepdag::state::FileStateStore;
use stepdag::step_id::StepId;
use stepdag::{StepdagError, run};
use stepdag_test_utils::{init_tracing, with_timeout};
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn Error>>;

const MEADOW: &str = "data://meadow/who/2024-01-01/gho";
const GARDEN: &str = "data://garden/who/2024-01-01/gho";

const PIPELINE: &str = r#"
[config]
state_dir = ".state"

[snapshot."snapshot://who/2024-01-01/gho.csv"]
hash = "ab12"

[step."data://meadow/who/2024-01-01/gho"]
deps = ["snapshot://who/2024-01-01/gho.csv"]
cmd = "printf '%s' \"$STEPDAG_STEP\" > meadow.txt"
outputs = ["meadow.txt"]

[step."data://garden/who/2024-01-01/gho"]
deps = ["data://meadow/who/2024-01-01/gho"]
cmd = "cat meadow.txt > garden.txt && echo \"$STEPDAG_DEPS\" >> runs.log"
outputs = ["garden.txt"]
"#;

fn write_manifest(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("dag.toml");
    fs::write(&path, contents).expect("write manifest");
    path
}

fn args(manifest: &Path, extra: &[&str]) -> CliArgs {
    let mut argv = vec![
        "stepdag".to_string(),
        "--manifest".to_string(),
        manifest.display().to_string(),
    ];
    argv.extend(extra.iter().map(|s| s.to_string()));
    CliArgs::try_parse_from(argv).expect("valid arguments")
}

fn shell_executor(state_dir: &Path) -> Result<Executor, Box<dyn Error>> {
    Ok(Executor::new(
        Arc::new(FileStateStore::open(state_dir)?),
        Arc::new(CommandRunner::new()),
        Arc::new(RealFileSystem),
        ExecutorOptions::default(),
    ))
}

#[tokio::test]
async fn pipeline_builds_once_then_stays_fresh() -> TestResult {
    with_timeout(async {
        init_tracing();
        let dir = TempDir::new()?;
        let manifest = write_manifest(dir.path(), PIPELINE);

        assert_eq!(run(args(&manifest, &[])).await?, 0);
        assert_eq!(fs::read_to_string(dir.path().join("meadow.txt"))?, MEADOW);
        assert_eq!(fs::read_to_string(dir.path().join("garden.txt"))?, MEADOW);
        let records = fs::read_dir(dir.path().join(".state/records"))?.count();
        assert_eq!(records, 2);

        // Nothing changed: the garden command must not run again.
        assert_eq!(run(args(&manifest, &[])).await?, 0);
        assert_eq!(fs::read_to_string(dir.path().join("runs.log"))?, format!("{MEADOW}\n"));

        // Forcing the garden step re-runs only that step.
        assert_eq!(run(args(&manifest, &[GARDEN, "--force"])).await?, 0);
        let log = fs::read_to_string(dir.path().join("runs.log"))?;
        assert_eq!(log.lines().count(), 2);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn deleting_an_output_triggers_a_rebuild() -> TestResult {
    with_timeout(async {
        init_tracing();
        let dir = TempDir::new()?;
        let manifest = write_manifest(dir.path(), PIPELINE);

        assert_eq!(run(args(&manifest, &[])).await?, 0);
        fs::remove_file(dir.path().join("garden.txt"))?;

        assert_eq!(run(args(&manifest, &[])).await?, 0);
        assert!(dir.path().join("garden.txt").exists());
        let log = fs::read_to_string(dir.path().join("runs.log"))?;
        assert_eq!(log.lines().count(), 2);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn dry_run_and_graph_listing_do_not_execute() -> TestResult {
    with_timeout(async {
        init_tracing();
        let dir = TempDir::new()?;
        let manifest = write_manifest(dir.path(), PIPELINE);

        assert_eq!(run(args(&manifest, &["--dry-run"])).await?, 0);
        assert_eq!(run(args(&manifest, &["--graph"])).await?, 0);
        assert!(!dir.path().join("meadow.txt").exists());
        assert!(!dir.path().join("runs.log").exists());
        assert!(!dir.path().join(".state").exists());
        Ok(())
    })
    .await
}

#[tokio::test]
async fn memory_state_forgets_between_runs() -> TestResult {
    with_timeout(async {
        init_tracing();
        let dir = TempDir::new()?;
        let manifest = write_manifest(dir.path(), PIPELINE);

        assert_eq!(run(args(&manifest, &["--state", "memory"])).await?, 0);
        assert_eq!(run(args(&manifest, &["--state", "memory"])).await?, 0);

        let log = fs::read_to_string(dir.path().join("runs.log"))?;
        assert_eq!(log.lines().count(), 2);
        assert!(!dir.path().join(".state").exists());
        Ok(())
    })
    .await
}

#[tokio::test]
async fn failing_command_exits_1_and_reports_its_status() -> TestResult {
    with_timeout(async {
        init_tracing();
        let dir = TempDir::new()?;
        let manifest = write_manifest(
            dir.path(),
            r#"
[step."data://meadow/who/2024-01-01/gho"]
cmd = "exit 3"

[step."data://garden/who/2024-01-01/gho"]
deps = ["data://meadow/who/2024-01-01/gho"]
cmd = "touch garden.txt"

[step."data://meadow/who/2024-01-01/notes"]
"#,
        );

        assert_eq!(run(args(&manifest, &[])).await?, 1);
        assert!(!dir.path().join("garden.txt").exists());

        let graph = StepGraph::build(load_and_validate(&manifest)?)?;
        let targets: BTreeSet<StepId> = graph.step_ids().cloned().collect();
        let report = shell_executor(&dir.path().join(".other"))?
            .run(&graph, &targets, CancelSignal::new())
            .await?;

        let state = |s: &str| report.state_of(&StepId::parse(s).expect("id")).cloned();
        assert_eq!(
            state(MEADOW),
            Some(StepState::Failed(StepExecutionError::ExitStatus(3)))
        );
        assert!(matches!(state(GARDEN), Some(StepState::Skipped(_))));
        assert_eq!(
            state("data://meadow/who/2024-01-01/notes"),
            Some(StepState::Failed(StepExecutionError::NoCommand))
        );
        Ok(())
    })
    .await
}

#[tokio::test]
async fn cancelling_kills_the_running_command() -> TestResult {
    with_timeout(async {
        init_tracing();
        let dir = TempDir::new()?;
        let manifest = write_manifest(
            dir.path(),
            r#"
[step."data://meadow/who/2024-01-01/gho"]
cmd = "sleep 30"

[step."data://garden/who/2024-01-01/gho"]
deps = ["data://meadow/who/2024-01-01/gho"]
cmd = "touch garden.txt"
"#,
        );

        let graph = StepGraph::build(load_and_validate(&manifest)?)?;
        let targets: BTreeSet<StepId> = graph.step_ids().cloned().collect();
        let executor = shell_executor(&dir.path().join(".state"))?;
        let cancel = CancelSignal::new();

        let started = Instant::now();
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        };
        let (report, ()) = tokio::join!(executor.run(&graph, &targets, cancel.clone()), trigger);
        let report = report?;

        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(report.exit_code(), 130);
        assert!(!dir.path().join("garden.txt").exists());
        Ok(())
    })
    .await
}

#[tokio::test]
async fn structural_problems_are_errors_not_exit_codes() -> TestResult {
    with_timeout(async {
        init_tracing();
        let dir = TempDir::new()?;

        let cyclic = write_manifest(
            dir.path(),
            r#"
[step."data://meadow/who/2024-01-01/gho"]
deps = ["data://garden/who/2024-01-01/gho"]

[step."data://garden/who/2024-01-01/gho"]
deps = ["data://meadow/who/2024-01-01/gho"]
"#,
        );
        let err = run(args(&cyclic, &[])).await.expect_err("cycle");
        assert!(matches!(err, StepdagError::Cycle(_)));

        let manifest = write_manifest(dir.path(), PIPELINE);
        let err = run(args(&manifest, &["data://grapher/*"])).await.expect_err("no match");
        assert!(matches!(err, StepdagError::Selection(_)));
        Ok(())
    })
    .await
}
