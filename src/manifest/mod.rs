// src/manifest/mod.rs

//! Declarative step manifest.
//!
//! - [`model`] holds the TOML-backed raw types and the validated [`Manifest`].
//! - [`loader`] reads files from disk, following `include` lists.
//! - [`validate`] merges files into one namespace and resolves dependencies.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_manifests, parse_str};
pub use model::{
    ConfigSection, Dependency, Manifest, ManifestConfig, ManifestSource, RawManifestFile,
    RawSnapshot, RawStep, SnapshotRef, StepDef,
};
