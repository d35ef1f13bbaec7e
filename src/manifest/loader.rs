// src/manifest/loader.rs

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::ManifestError;
use crate::manifest::model::{Manifest, ManifestSource, RawManifestFile};

/// Read and deserialize a single manifest file.
///
/// This only performs TOML deserialization; identifiers and dependency
/// references are checked by [`Manifest::from_sources`].
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawManifestFile, ManifestError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_str(path, &contents)
}

/// Deserialize manifest text; `path` is only used for error messages.
pub fn parse_str(path: impl AsRef<Path>, contents: &str) -> Result<RawManifestFile, ManifestError> {
    toml::from_str(contents).map_err(|source| ManifestError::Parse {
        path: path.as_ref().to_path_buf(),
        source,
    })
}

/// Load one or more manifest files, follow their `include` lists, merge
/// everything into one namespace and validate it.
///
/// Files are visited breadth-first in the order given; a file reached twice
/// (e.g. included from two places) is read once. Identifiers defined in more
/// than one file are rejected.
pub fn load_manifests<P: AsRef<Path>>(paths: &[P]) -> Result<Manifest, ManifestError> {
    let mut queue: VecDeque<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut sources = Vec::new();

    while let Some(path) = queue.pop_front() {
        let key = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if !seen.insert(key) {
            debug!(path = ?path, "manifest already loaded; skipping");
            continue;
        }

        let raw = load_from_path(&path)?;
        debug!(
            path = ?path,
            steps = raw.step.len(),
            snapshots = raw.snapshot.len(),
            includes = raw.include.len(),
            "loaded manifest file"
        );

        let source = ManifestSource::new(path, raw);
        let base = source.base_dir();
        for include in &source.raw.include {
            queue.push_back(base.join(include));
        }
        sources.push(source);
    }

    Manifest::from_sources(sources)
}

/// Load a single manifest (plus its includes) and validate it.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Manifest, ManifestError> {
    load_manifests(&[path.as_ref()])
}
