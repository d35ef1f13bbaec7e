use std::path::PathBuf;

use stepdag::dag::StepGraph;
use stepdag::errors::ManifestError;
use stepdag::manifest::{
    ConfigSection, Manifest, ManifestSource, RawManifestFile, RawSnapshot, RawStep,
};

/// Builder for an in-memory [`Manifest`] to simplify test setup.
///
/// The manifest pretends to live at `origin` (default `/proj/dag.toml`), so
/// relative `sources`/`outputs` resolve below `/proj`, which is where tests
/// put files in the mock filesystem.
pub struct ManifestBuilder {
    origin: PathBuf,
    raw: RawManifestFile,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self {
            origin: PathBuf::from("/proj/dag.toml"),
            raw: RawManifestFile::default(),
        }
    }

    /// Pretend the manifest was read from `path`.
    pub fn at(mut self, path: impl Into<PathBuf>) -> Self {
        self.origin = path.into();
        self
    }

    pub fn snapshot(mut self, id: &str, hash: &str) -> Self {
        self.raw.snapshot.insert(
            id.to_string(),
            RawSnapshot {
                hash: hash.to_string(),
                size: None,
            },
        );
        self
    }

    pub fn step(mut self, id: &str, step: StepBuilder) -> Self {
        self.raw.step.insert(id.to_string(), step.raw);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.raw
            .config
            .get_or_insert_with(ConfigSection::default)
            .workers = workers;
        self
    }

    pub fn raw(self) -> RawManifestFile {
        self.raw
    }

    pub fn try_build(self) -> Result<Manifest, ManifestError> {
        Manifest::from_sources(vec![ManifestSource::new(self.origin, self.raw)])
    }

    pub fn build(self) -> Manifest {
        self.try_build()
            .expect("Failed to build valid manifest from builder")
    }

    /// Build the manifest and its graph.
    pub fn graph(self) -> StepGraph {
        StepGraph::build(self.build()).expect("builder produced a cyclic graph")
    }
}

impl Default for ManifestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a single `[step."<id>"]` entry.
#[derive(Default)]
pub struct StepBuilder {
    raw: RawStep,
}

impl StepBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dep(mut self, id: &str) -> Self {
        self.raw.deps.push(id.to_string());
        self
    }

    pub fn cmd(mut self, cmd: &str) -> Self {
        self.raw.cmd = Some(cmd.to_string());
        self
    }

    pub fn seed(mut self, seed: &str) -> Self {
        self.raw.seed = Some(seed.to_string());
        self
    }

    pub fn source(mut self, pattern: &str) -> Self {
        self.raw.sources.push(pattern.to_string());
        self
    }

    pub fn output(mut self, path: &str) -> Self {
        self.raw.outputs.push(path.to_string());
        self
    }

    pub fn param(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.raw.params.insert(key.to_string(), value.into());
        self
    }
}

/// `A -> {B, C} -> D` with a snapshot feeding `A`.
pub fn diamond() -> ManifestBuilder {
    ManifestBuilder::new()
        .snapshot(ids::SNAP, "aa11")
        .step(ids::A, StepBuilder::new().dep(ids::SNAP).seed("a"))
        .step(ids::B, StepBuilder::new().dep(ids::A).seed("b"))
        .step(ids::C, StepBuilder::new().dep(ids::A).seed("c"))
        .step(ids::D, StepBuilder::new().dep(ids::B).dep(ids::C).seed("d"))
}

/// Identifiers shared by the fixtures.
pub mod ids {
    pub const SNAP: &str = "snapshot://who/2024-01-01/gho.csv";
    pub const A: &str = "data://meadow/who/2024-01-01/gho";
    pub const B: &str = "data://garden/who/2024-01-01/gho";
    pub const C: &str = "data://garden/who/2024-01-01/gho_regions";
    pub const D: &str = "data://grapher/who/2024-01-01/gho";
}
