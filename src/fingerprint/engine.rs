// src/fingerprint/engine.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use tracing::{debug, trace};

use crate::dag::StepGraph;
use crate::fingerprint::hash::Fingerprint;
use crate::fingerprint::seed::SeedDeriver;
use crate::fs::FileSystem;
use crate::step_id::StepId;

/// Per-run memo of computed fingerprints.
///
/// Also counts how often each identifier was actually computed and how many
/// lookups were served from the cache, so shared ancestors can be checked to
/// be fingerprinted exactly once.
#[derive(Debug, Default)]
pub struct FingerprintCache {
    entries: HashMap<StepId, Fingerprint>,
    computed: HashMap<StepId, usize>,
    hits: usize,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &StepId) -> Option<&Fingerprint> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of times `id` was computed (not served from cache).
    pub fn computations_of(&self, id: &StepId) -> usize {
        self.computed.get(id).copied().unwrap_or(0)
    }

    pub fn total_computations(&self) -> usize {
        self.computed.values().sum()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    fn insert(&mut self, id: StepId, fp: Fingerprint) {
        *self.computed.entry(id.clone()).or_insert(0) += 1;
        self.entries.insert(id, fp);
    }

    fn lookup(&mut self, id: &StepId) -> Option<Fingerprint> {
        let found = self.entries.get(id).cloned();
        if found.is_some() {
            self.hits += 1;
        }
        found
    }
}

/// Computes `F(step) = H(seed(step), F(dep_1), ..., F(dep_n))` bottom-up.
///
/// Dependencies are combined in identifier order, so declaration order in
/// the manifest never affects the result. Snapshots fingerprint to their
/// content hash.
#[derive(Debug)]
pub struct FingerprintEngine {
    fs: Arc<dyn FileSystem>,
    seeds: SeedDeriver,
}

impl FingerprintEngine {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            seeds: SeedDeriver::new(),
        }
    }

    /// Fingerprint of `id`, computing (and caching) any missing ancestors first.
    pub fn fingerprint(
        &mut self,
        id: &StepId,
        graph: &StepGraph,
        cache: &mut FingerprintCache,
    ) -> Result<Fingerprint> {
        if let Some(fp) = cache.lookup(id) {
            trace!(step = %id, "fingerprint cache hit");
            return Ok(fp);
        }

        // Iterative post-order walk: a node is expanded once (deps pushed),
        // then computed when popped again with all deps cached.
        let mut stack: Vec<(StepId, bool)> = vec![(id.clone(), false)];

        while let Some((node, expanded)) = stack.pop() {
            if cache.get(&node).is_some() {
                continue;
            }

            if !expanded {
                stack.push((node.clone(), true));
                for dep in graph.dependencies_of(&node) {
                    if cache.lookup(dep).is_none() {
                        stack.push((dep.clone(), false));
                    }
                }
                continue;
            }

            let fp = self.compute_one(&node, graph, cache)?;
            debug!(step = %node, fingerprint = %fp.short(), "computed fingerprint");
            cache.insert(node, fp);
        }

        cache
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("fingerprint for '{id}' was not computed"))
    }

    /// Fingerprints for every identifier in `ids`, sharing one cache.
    pub fn fingerprint_all<'a, I>(
        &mut self,
        ids: I,
        graph: &StepGraph,
        cache: &mut FingerprintCache,
    ) -> Result<BTreeMap<StepId, Fingerprint>>
    where
        I: IntoIterator<Item = &'a StepId>,
    {
        let mut out = BTreeMap::new();
        for id in ids {
            let fp = self.fingerprint(id, graph, cache)?;
            out.insert(id.clone(), fp);
        }
        Ok(out)
    }

    fn compute_one(
        &mut self,
        id: &StepId,
        graph: &StepGraph,
        cache: &FingerprintCache,
    ) -> Result<Fingerprint> {
        let manifest = graph.manifest();

        if let Some(snapshot) = manifest.snapshot(id) {
            return Ok(Fingerprint::from_content_hash(&snapshot.hash));
        }

        let step = manifest
            .step(id)
            .ok_or_else(|| anyhow!("unknown identifier '{id}'"))?;

        let seed = self.seeds.derive(self.fs.as_ref(), step)?;

        // `dependencies_of` is sorted by identifier.
        let deps = graph.dependencies_of(id);
        let mut dep_fps = Vec::with_capacity(deps.len());
        for dep in deps {
            let fp = cache
                .get(dep)
                .ok_or_else(|| anyhow!("dependency '{dep}' of '{id}' not fingerprinted yet"))?;
            dep_fps.push(fp);
        }

        Ok(Fingerprint::combine(&seed, dep_fps))
    }
}
