// src/lib.rs

pub mod cli;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fingerprint;
pub mod fs;
pub mod logging;
pub mod manifest;
pub mod select;
pub mod state;
pub mod step_id;
pub mod types;

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::dag::StepGraph;
use crate::engine::{CancelSignal, Executor, ExecutorOptions};
use crate::errors::Result;
use crate::exec::CommandRunner;
use crate::fs::RealFileSystem;
use crate::manifest::load_manifests;
use crate::select::{Selection, select_targets};
use crate::state::{open_store, open_store_read_only};
use crate::step_id::StepId;

pub use crate::errors::StepdagError;

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - manifest loading and validation
/// - graph construction (cycle check)
/// - target selection
/// - the executor with the shell command runner and the configured store
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let manifest = load_manifests(&args.manifest)?;
    info!(
        manifests = args.manifest.len(),
        steps = manifest.steps().len(),
        snapshots = manifest.snapshots().len(),
        "loaded manifest"
    );

    let graph = StepGraph::build(manifest)?;

    if args.graph {
        print!("{}", render_graph(&graph));
        return Ok(0);
    }

    let selection = Selection {
        selectors: args.targets.clone(),
        exclude: args.exclude.clone(),
        downstream: args.downstream,
    };
    let targets = select_targets(&graph, &selection)?;
    debug!(targets = targets.len(), "selected targets");

    let config = &graph.manifest().config;
    let workers = args
        .workers
        .map(|w| w as usize)
        .unwrap_or(config.workers);
    let state_dir = args
        .state_dir
        .clone()
        .unwrap_or_else(|| config.state_dir.clone());
    let storage = args.state_storage.unwrap_or(config.state_storage);

    let options = ExecutorOptions {
        workers,
        force: args.force,
    };

    if args.dry_run {
        let executor = Executor::new(
            open_store_read_only(storage, &state_dir),
            Arc::new(CommandRunner::new()),
            Arc::new(RealFileSystem),
            options,
        );
        let plan = executor.plan(&graph, &targets)?;
        print!("{}", plan.render());
        return Ok(0);
    }

    let store = open_store(storage, &state_dir)?;
    let executor = Executor::new(
        store.clone(),
        Arc::new(CommandRunner::new()),
        Arc::new(RealFileSystem),
        options,
    );

    let cancel = CancelSignal::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; cancelling build");
            cancel.cancel();
        });
    }

    let report = executor.run(&graph, &targets, cancel).await?;
    print!("{}", report.render_summary());

    if args.prune {
        let active: BTreeSet<StepId> = graph.step_ids().cloned().collect();
        let removed = store.prune(&active)?;
        info!(removed, "pruned stale build records");
    }

    Ok(report.exit_code())
}

/// Listing printed by `--graph`: every step in topological order with its
/// direct dependencies.
pub fn render_graph(graph: &StepGraph) -> String {
    let order = graph.topological_order(graph.step_ids());
    let mut out = String::new();
    for id in &order {
        let _ = writeln!(out, "{id}");
        for dep in graph.dependencies_of(id) {
            let kind = if graph.is_step(dep) { "step" } else { "snapshot" };
            let _ = writeln!(out, "    <- {dep} ({kind})");
        }
    }
    out
}
