// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::types::StateStorageMode;

/// Command-line arguments for `stepdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stepdag",
    version,
    about = "Incrementally build a step dependency graph, re-running only stale steps.",
    long_about = None
)]
pub struct CliArgs {
    /// Steps to build: exact identifier, glob (`data://garden/*`) or substring.
    ///
    /// With no selector every step in the manifest is a target.
    #[arg(value_name = "SELECTOR")]
    pub targets: Vec<String>,

    /// Manifest file(s) to load (TOML). Repeatable.
    #[arg(long, short = 'm', value_name = "PATH", default_value = "dag.toml")]
    pub manifest: Vec<PathBuf>,

    /// Maximum number of steps running at once (overrides `[config].workers`).
    #[arg(long, short = 'j', value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub workers: Option<u64>,

    /// Print the plan (fresh/stale and why) without running anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Re-run the selected targets even when they are fresh.
    #[arg(long)]
    pub force: bool,

    /// Also select every step downstream of each selector match.
    #[arg(long)]
    pub downstream: bool,

    /// Drop steps matching this selector from the targets. Repeatable.
    #[arg(long, value_name = "SELECTOR")]
    pub exclude: Vec<String>,

    /// Print every step in topological order with its dependencies and exit.
    #[arg(long)]
    pub graph: bool,

    /// Remove build records of steps no longer in the manifest.
    #[arg(long)]
    pub prune: bool,

    /// Directory for build records (overrides `[config].state_dir`).
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Where build records live (overrides `[config].state_storage`).
    #[arg(long = "state", value_enum, value_name = "MODE")]
    pub state_storage: Option<StateStorageMode>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STEPDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
