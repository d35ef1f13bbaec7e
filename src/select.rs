// src/select.rs

//! Turns user-facing selectors into the target set of a build.
//!
//! A selector containing glob metacharacters (`*?[{`) is matched as a glob
//! against canonical identifiers, otherwise it is an exact identifier when it
//! parses as one, otherwise a substring of the canonical identifier.

use std::collections::BTreeSet;

use globset::{Glob, GlobMatcher};
use tracing::{debug, warn};

use crate::dag::StepGraph;
use crate::errors::{Result, StepdagError};
use crate::step_id::StepId;

const GLOB_META: &[char] = &['*', '?', '[', '{'];

#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Empty means every step.
    pub selectors: Vec<String>,
    /// Steps matching any of these are dropped from the targets.
    pub exclude: Vec<String>,
    /// Also select everything downstream of each match.
    pub downstream: bool,
}

#[derive(Debug, Clone)]
enum Matcher {
    Glob(GlobMatcher),
    Exact(StepId),
    Substring(String),
}

impl Matcher {
    fn parse(selector: &str) -> Result<Self> {
        let selector = selector.trim();
        if selector.contains(GLOB_META) {
            let glob = Glob::new(selector)
                .map_err(|e| StepdagError::Selection(format!("invalid pattern '{selector}': {e}")))?;
            return Ok(Matcher::Glob(glob.compile_matcher()));
        }
        match StepId::parse(selector) {
            Ok(id) => Ok(Matcher::Exact(id)),
            Err(_) => Ok(Matcher::Substring(selector.to_string())),
        }
    }

    fn matches(&self, id: &StepId) -> bool {
        match self {
            Matcher::Glob(glob) => glob.is_match(id.as_str()),
            Matcher::Exact(exact) => exact == id,
            Matcher::Substring(needle) => id.as_str().contains(needle.as_str()),
        }
    }
}

/// Resolve `selection` against `graph`. The result only contains steps.
pub fn select_targets(graph: &StepGraph, selection: &Selection) -> Result<BTreeSet<StepId>> {
    let manifest = graph.manifest();
    let mut targets: BTreeSet<StepId> = BTreeSet::new();

    if selection.selectors.is_empty() {
        targets.extend(graph.step_ids().cloned());
    }

    for selector in &selection.selectors {
        let matcher = Matcher::parse(selector)?;

        let steps: Vec<&StepId> = manifest.steps().keys().filter(|id| matcher.matches(id)).collect();
        let snapshots: Vec<&StepId> = if selection.downstream {
            manifest
                .snapshots()
                .keys()
                .filter(|id| matcher.matches(id))
                .collect()
        } else {
            Vec::new()
        };

        if steps.is_empty() && snapshots.is_empty() {
            if let Matcher::Exact(id) = &matcher
                && id.is_snapshot()
                && manifest.snapshot(id).is_some()
            {
                return Err(StepdagError::Selection(format!(
                    "'{id}' is a snapshot and cannot be built; use --downstream to select its dependents"
                )));
            }
            return Err(StepdagError::Selection(format!(
                "selector '{selector}' matches no step"
            )));
        }

        debug!(
            selector = %selector,
            steps = steps.len(),
            snapshots = snapshots.len(),
            "selector matched"
        );

        for id in steps {
            targets.insert(id.clone());
            if selection.downstream {
                targets.extend(graph.downstream_of(id));
            }
        }
        for id in snapshots {
            targets.extend(graph.downstream_of(id));
        }
    }

    if !selection.exclude.is_empty() {
        let excludes = selection
            .exclude
            .iter()
            .map(|e| Matcher::parse(e))
            .collect::<Result<Vec<_>>>()?;
        let before = targets.len();
        targets.retain(|id| !excludes.iter().any(|m| m.matches(id)));
        debug!(removed = before - targets.len(), "applied exclusions");
    }

    targets.retain(|id| graph.is_step(id));

    if targets.is_empty() {
        let reason = if graph.step_ids().next().is_none() {
            "manifest defines no steps"
        } else if selection.exclude.is_empty() {
            "selection matched no buildable step"
        } else {
            "every selected step was excluded"
        };
        warn!(reason, "selection is empty");
        return Err(StepdagError::Selection(reason.to_string()));
    }

    Ok(targets)
}
