// src/manifest/validate.rs

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use globset::Glob;

use crate::errors::ManifestError;
use crate::manifest::model::{
    ConfigSection, DEFAULT_STATE_DIR, Dependency, Manifest, ManifestConfig, ManifestSource,
    SnapshotRef, StepDef,
};
use crate::step_id::StepId;

impl Manifest {
    /// Merge parsed manifest files into a single validated manifest.
    ///
    /// Rejects: malformed identifiers, identifiers defined twice (within or
    /// across files, as step or snapshot), snapshot/step scheme mismatches,
    /// self-dependencies, dependencies on unknown identifiers, malformed
    /// snapshot hashes, invalid `sources` globs and conflicting `[config]`.
    pub fn from_sources(sources: Vec<ManifestSource>) -> Result<Self, ManifestError> {
        let root = sources
            .first()
            .map(|s| s.base_dir())
            .unwrap_or_else(|| PathBuf::from("."));

        let config = merge_config(&sources)?;

        let mut origins: HashMap<StepId, PathBuf> = HashMap::new();
        let mut snapshots: BTreeMap<StepId, SnapshotRef> = BTreeMap::new();
        // Raw dependency strings are resolved once every file has been seen.
        let mut pending_steps: Vec<(StepDef, Vec<StepId>)> = Vec::new();

        for source in &sources {
            let base = source.base_dir();

            for (raw_id, snap) in &source.raw.snapshot {
                let id = parse_id(source, raw_id)?;
                if !id.is_snapshot() {
                    return Err(ManifestError::WrongKind {
                        path: source.path.clone(),
                        id,
                        declared_as: "snapshot",
                    });
                }
                register(&mut origins, &id, &source.path)?;
                validate_hash(source, &id, &snap.hash)?;
                snapshots.insert(
                    id.clone(),
                    SnapshotRef {
                        id,
                        hash: snap.hash.trim().to_ascii_lowercase(),
                        size: snap.size,
                        origin: source.path.clone(),
                    },
                );
            }

            for (raw_id, step) in &source.raw.step {
                let id = parse_id(source, raw_id)?;
                if id.is_snapshot() {
                    return Err(ManifestError::WrongKind {
                        path: source.path.clone(),
                        id,
                        declared_as: "step",
                    });
                }
                register(&mut origins, &id, &source.path)?;

                let mut dep_ids = Vec::with_capacity(step.deps.len());
                let mut seen = HashSet::new();
                for raw_dep in &step.deps {
                    let dep = parse_id(source, raw_dep)?;
                    if dep == id {
                        return Err(ManifestError::SelfDependency(id));
                    }
                    if !seen.insert(dep.clone()) {
                        return Err(ManifestError::Invalid {
                            path: source.path.clone(),
                            message: format!("step '{id}' lists dependency '{dep}' twice"),
                        });
                    }
                    dep_ids.push(dep);
                }

                for pattern in &step.sources {
                    Glob::new(pattern).map_err(|e| ManifestError::Invalid {
                        path: source.path.clone(),
                        message: format!("step '{id}' has invalid sources pattern '{pattern}': {e}"),
                    })?;
                }

                let def = StepDef {
                    id: id.clone(),
                    deps: Vec::new(),
                    cmd: step.cmd.clone(),
                    seed: step.seed.clone(),
                    sources: step.sources.clone(),
                    outputs: step.outputs.iter().map(|o| base.join(o)).collect(),
                    params: step.params.clone(),
                    base_dir: base.clone(),
                    origin: source.path.clone(),
                };
                pending_steps.push((def, dep_ids));
            }
        }

        let step_ids: HashSet<StepId> = pending_steps.iter().map(|(d, _)| d.id.clone()).collect();
        let mut steps = BTreeMap::new();

        for (mut def, dep_ids) in pending_steps {
            for dep in dep_ids {
                let resolved = if step_ids.contains(&dep) {
                    Dependency::Step(dep)
                } else if snapshots.contains_key(&dep) {
                    Dependency::Snapshot(dep)
                } else {
                    return Err(ManifestError::UnresolvedDependency {
                        step: def.id.clone(),
                        dep,
                    });
                };
                def.deps.push(resolved);
            }
            steps.insert(def.id.clone(), def);
        }

        Ok(Manifest::new_unchecked(config, root, steps, snapshots))
    }
}

fn parse_id(source: &ManifestSource, raw: &str) -> Result<StepId, ManifestError> {
    StepId::parse(raw).map_err(|e| ManifestError::InvalidIdentifier {
        path: source.path.clone(),
        source: e,
    })
}

fn register(
    origins: &mut HashMap<StepId, PathBuf>,
    id: &StepId,
    path: &Path,
) -> Result<(), ManifestError> {
    if let Some(first) = origins.get(id) {
        return Err(ManifestError::Duplicate {
            id: id.to_string(),
            first: first.clone(),
            second: path.to_path_buf(),
        });
    }
    origins.insert(id.clone(), path.to_path_buf());
    Ok(())
}

fn validate_hash(source: &ManifestSource, id: &StepId, hash: &str) -> Result<(), ManifestError> {
    let hash = hash.trim();
    if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ManifestError::Invalid {
            path: source.path.clone(),
            message: format!("snapshot '{id}' has malformed content hash '{hash}' (expected hex)"),
        });
    }
    Ok(())
}

/// The first file declaring `[config]` defines it; any later declaration
/// must be identical.
fn merge_config(sources: &[ManifestSource]) -> Result<ManifestConfig, ManifestError> {
    let mut chosen: Option<(&ManifestSource, &ConfigSection)> = None;

    for source in sources {
        let Some(cfg) = source.raw.config.as_ref() else {
            continue;
        };
        match chosen {
            None => chosen = Some((source, cfg)),
            Some((first, existing)) if existing != cfg => {
                return Err(ManifestError::Invalid {
                    path: source.path.clone(),
                    message: format!(
                        "[config] conflicts with the one declared in {:?}",
                        first.path
                    ),
                });
            }
            Some(_) => {}
        }
    }

    let (base, section) = match chosen {
        Some((source, cfg)) => (source.base_dir(), cfg.clone()),
        None => (
            sources
                .first()
                .map(|s| s.base_dir())
                .unwrap_or_else(|| PathBuf::from(".")),
            ConfigSection::default(),
        ),
    };

    if section.workers == 0 {
        let path = chosen
            .map(|(s, _)| s.path.clone())
            .unwrap_or_default();
        return Err(ManifestError::Invalid {
            path,
            message: "[config].workers must be >= 1 (got 0)".to_string(),
        });
    }

    let state_dir = base.join(
        section
            .state_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
    );

    Ok(ManifestConfig {
        workers: section.workers,
        state_dir,
        state_storage: section.state_storage,
    })
}
