// src/manifest/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::step_id::StepId;
use crate::types::StateStorageMode;

/// One manifest file exactly as read from TOML.
///
/// ```toml
/// include = ["dag/garden.toml"]
///
/// [config]
/// workers = 4
///
/// [snapshot."snapshot://who/2024-01-01/gho.csv"]
/// hash = "9f86d081884c7d65"
/// size = 1024
///
/// [step."data://meadow/who/2024-01-01/gho"]
/// deps = ["snapshot://who/2024-01-01/gho.csv"]
/// cmd = "python -m etl.steps meadow/who/2024-01-01/gho"
/// ```
///
/// Every section is optional so partial manifests can be merged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawManifestFile {
    /// Further manifest files, relative to this one.
    #[serde(default)]
    pub include: Vec<String>,

    #[serde(default)]
    pub config: Option<ConfigSection>,

    /// `[snapshot."<id>"]` tables keyed by raw identifier.
    #[serde(default)]
    pub snapshot: BTreeMap<String, RawSnapshot>,

    /// `[step."<id>"]` tables keyed by raw identifier.
    #[serde(default)]
    pub step: BTreeMap<String, RawStep>,
}

/// `[config]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Maximum number of steps executing at the same time.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Directory for build records, relative to the declaring manifest.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    #[serde(default)]
    pub state_storage: StateStorageMode,
}

pub(crate) fn default_workers() -> usize {
    4
}

pub(crate) const DEFAULT_STATE_DIR: &str = ".stepdag";

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            state_dir: None,
            state_storage: StateStorageMode::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSnapshot {
    /// Content hash of the snapshot file (hex).
    pub hash: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStep {
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub seed: Option<String>,
    /// Glob patterns whose matching files feed the definition seed.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub params: toml::Table,
}

/// A manifest file together with where it came from.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    pub path: PathBuf,
    pub raw: RawManifestFile,
}

impl ManifestSource {
    pub fn new(path: impl Into<PathBuf>, raw: RawManifestFile) -> Self {
        Self {
            path: path.into(),
            raw,
        }
    }

    /// Directory that relative paths in this file are resolved against.
    pub fn base_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// Effective `[config]` after merging and applying defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestConfig {
    pub workers: usize,
    pub state_dir: PathBuf,
    pub state_storage: StateStorageMode,
}

/// A dependency edge, resolved against the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dependency {
    Step(StepId),
    Snapshot(StepId),
}

impl Dependency {
    pub fn id(&self) -> &StepId {
        match self {
            Dependency::Step(id) | Dependency::Snapshot(id) => id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepDef {
    pub id: StepId,
    /// Declared dependencies in declaration order.
    pub deps: Vec<Dependency>,
    pub cmd: Option<String>,
    pub seed: Option<String>,
    pub sources: Vec<String>,
    /// Declared outputs, resolved against `base_dir`.
    pub outputs: Vec<PathBuf>,
    pub params: toml::Table,
    /// Directory of the manifest file that declared this step.
    pub base_dir: PathBuf,
    pub origin: PathBuf,
}

/// External Snapshot Reference: immutable, content-addressed leaf input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    pub id: StepId,
    pub hash: String,
    pub size: Option<u64>,
    pub origin: PathBuf,
}

/// Validated manifest: every identifier parsed, unique, and every dependency
/// resolved. Acyclicity is checked when the graph is built.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub config: ManifestConfig,
    root: PathBuf,
    steps: BTreeMap<StepId, StepDef>,
    snapshots: BTreeMap<StepId, SnapshotRef>,
}

impl Manifest {
    pub(crate) fn new_unchecked(
        config: ManifestConfig,
        root: PathBuf,
        steps: BTreeMap<StepId, StepDef>,
        snapshots: BTreeMap<StepId, SnapshotRef>,
    ) -> Self {
        Self {
            config,
            root,
            steps,
            snapshots,
        }
    }

    /// Directory of the first manifest file; the working directory for runners.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn steps(&self) -> &BTreeMap<StepId, StepDef> {
        &self.steps
    }

    pub fn snapshots(&self) -> &BTreeMap<StepId, SnapshotRef> {
        &self.snapshots
    }

    pub fn step(&self, id: &StepId) -> Option<&StepDef> {
        self.steps.get(id)
    }

    pub fn snapshot(&self, id: &StepId) -> Option<&SnapshotRef> {
        self.snapshots.get(id)
    }

    pub fn contains(&self, id: &StepId) -> bool {
        self.steps.contains_key(id) || self.snapshots.contains_key(id)
    }
}
