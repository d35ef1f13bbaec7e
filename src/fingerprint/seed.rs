// src/fingerprint/seed.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};

use crate::fingerprint::canonical::canonical_params;
use crate::fingerprint::hash::{DefinitionSeed, SeedBuilder, compute_file_hash};
use crate::fs::{FileSystem, walk_files};
use crate::manifest::StepDef;

/// Derives definition seeds, remembering directory listings so that a
/// manifest with many steps under the same root walks it only once.
#[derive(Debug, Default)]
pub struct SeedDeriver {
    listings: HashMap<PathBuf, Vec<PathBuf>>,
}

impl SeedDeriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed = hash of the explicit `seed`, `cmd`, canonical `params` and the
    /// (relative path, content hash) pairs of every file matched by `sources`,
    /// sorted by path.
    pub fn derive(&mut self, fs: &dyn FileSystem, step: &StepDef) -> Result<DefinitionSeed> {
        let sources = self.source_files(fs, step)?;

        let mut builder = SeedBuilder::new()
            .optional(step.seed.as_deref())
            .optional(step.cmd.as_deref())
            .text(&canonical_params(&step.params))
            .count(sources.len());

        for (rel, path) in &sources {
            let hash = compute_file_hash(fs, path)
                .with_context(|| format!("hashing source file of step '{}'", step.id))?;
            builder = builder.text(rel).text(&hash);
        }

        Ok(builder.finish())
    }

    fn source_files(&mut self, fs: &dyn FileSystem, step: &StepDef) -> Result<Vec<(String, PathBuf)>> {
        if step.sources.is_empty() {
            return Ok(Vec::new());
        }

        let globs = build_globset(&step.sources)
            .with_context(|| format!("building sources globset for step '{}'", step.id))?;

        let listing = self.listing(fs, &step.base_dir)?;
        let mut matched: Vec<(String, PathBuf)> = listing
            .iter()
            .filter_map(|path| {
                let rel = relative_str(&step.base_dir, path)?;
                globs.is_match(&rel).then(|| (rel, path.clone()))
            })
            .collect();
        matched.sort();

        if matched.is_empty() {
            warn!(
                step = %step.id,
                patterns = ?step.sources,
                "sources patterns matched no files"
            );
        } else {
            debug!(step = %step.id, files = matched.len(), "hashing source files");
        }

        Ok(matched)
    }

    fn listing(&mut self, fs: &dyn FileSystem, base: &Path) -> Result<&Vec<PathBuf>> {
        if !self.listings.contains_key(base) {
            let files = walk_files(fs, base)?;
            self.listings.insert(base.to_path_buf(), files);
        }
        Ok(&self.listings[base])
    }
}

/// Path of `path` relative to `base`, with `/` separators on every platform.
fn relative_str(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}
