// src/fingerprint/mod.rs

//! Content fingerprints.
//!
//! - [`hash`]: blake3 primitives, the [`Fingerprint`] type and output checksums.
//! - [`canonical`]: order-independent rendering of step parameters.
//! - [`seed`]: a step's definition seed (explicit seed, cmd, params, sources).
//! - [`engine`]: memoized bottom-up fingerprinting over the step graph.

pub mod canonical;
pub mod engine;
pub mod hash;
pub mod seed;

pub use canonical::canonical_params;
pub use engine::{FingerprintCache, FingerprintEngine};
pub use hash::{
    DefinitionSeed, Fingerprint, OutputHashError, SeedBuilder, compute_file_hash, hash_str,
    outputs_checksum,
};
pub use seed::SeedDeriver;
