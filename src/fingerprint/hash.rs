// src/fingerprint/hash.rs

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::fs::FileSystem;

/// Domain separation tag mixed into every step fingerprint.
const FINGERPRINT_DOMAIN: &[u8] = b"stepdag/fingerprint/v1";
const SEED_DOMAIN: &[u8] = b"stepdag/seed/v1";

/// Content fingerprint of a step or snapshot (hex).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// A snapshot's fingerprint is exactly its content hash, in lowercase hex.
    pub fn from_content_hash(hash: &str) -> Self {
        Self(hash.trim().to_ascii_lowercase())
    }

    /// `H(seed, F(dep_1), ..., F(dep_n))`. `deps` must already be in
    /// canonical order; the engine sorts them by dependency identifier.
    pub fn combine<'a, I>(seed: &DefinitionSeed, deps: I) -> Self
    where
        I: IntoIterator<Item = &'a Fingerprint>,
    {
        let mut hasher = FieldHasher::new(FINGERPRINT_DOMAIN);
        hasher.field(seed.as_str().as_bytes());
        for dep in deps {
            hasher.field(dep.as_str().as_bytes());
        }
        Self(hasher.finish())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for logs and plan listings.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

/// Identity of a step's own logic and configuration, independent of its
/// dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DefinitionSeed(String);

impl DefinitionSeed {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Builds a [`DefinitionSeed`] from optional and repeated fields.
///
/// Every field is length-prefixed (little-endian `u64`) so that adjacent
/// fields can never be confused, and optional fields carry a presence byte.
pub struct SeedBuilder {
    hasher: FieldHasher,
}

impl SeedBuilder {
    pub fn new() -> Self {
        Self {
            hasher: FieldHasher::new(SEED_DOMAIN),
        }
    }

    pub fn text(mut self, value: &str) -> Self {
        self.hasher.field(value.as_bytes());
        self
    }

    pub fn optional(mut self, value: Option<&str>) -> Self {
        match value {
            Some(v) => {
                self.hasher.raw(&[1]);
                self.hasher.field(v.as_bytes());
            }
            None => self.hasher.raw(&[0]),
        }
        self
    }

    pub fn count(mut self, n: usize) -> Self {
        self.hasher.raw(&(n as u64).to_le_bytes());
        self
    }

    pub fn finish(self) -> DefinitionSeed {
        DefinitionSeed(self.hasher.finish())
    }
}

impl Default for SeedBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct FieldHasher {
    inner: Hasher,
}

impl FieldHasher {
    fn new(domain: &[u8]) -> Self {
        let mut inner = Hasher::new();
        inner.update(domain);
        Self { inner }
    }

    fn field(&mut self, bytes: &[u8]) {
        self.inner.update(&(bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
    }

    fn raw(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    fn finish(self) -> String {
        self.inner.finalize().to_hex().to_string()
    }
}

/// Hash everything readable from `reader`.
pub fn hash_reader(mut reader: impl Read) -> std::io::Result<String> {
    let mut hasher = Hasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Compute the hash of a single file.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let reader = fs.open_read(path)?;
    hash_reader(reader).with_context(|| format!("hashing file {:?}", path))
}

/// Hash a string (used for keys and record file names).
pub fn hash_str(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

#[derive(Debug, Error)]
pub enum OutputHashError {
    #[error("output {0:?} does not exist")]
    Missing(PathBuf),

    #[error("output {path:?} could not be read: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

/// Aggregate checksum over declared outputs.
///
/// Order of `paths` does not matter; they are sorted before hashing. Every
/// output must exist. Returns `None` when no outputs are declared.
pub fn outputs_checksum(
    fs: &dyn FileSystem,
    paths: &[PathBuf],
) -> std::result::Result<Option<String>, OutputHashError> {
    if paths.is_empty() {
        return Ok(None);
    }

    let mut sorted: Vec<&PathBuf> = paths.iter().collect();
    sorted.sort();

    let mut hasher = Hasher::new();
    for path in sorted {
        if !fs.is_file(path) {
            return Err(OutputHashError::Missing(path.clone()));
        }
        let file_hash =
            compute_file_hash(fs, path).map_err(|source| OutputHashError::Unreadable {
                path: path.clone(),
                source,
            })?;
        hasher.update(file_hash.as_bytes());
    }

    let checksum = hasher.finalize().to_hex().to_string();
    debug!(checksum = %checksum, outputs = paths.len(), "computed output checksum");
    Ok(Some(checksum))
}
