// src/types.rs

use clap::ValueEnum;
use serde::Deserialize;

/// Where build records are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StateStorageMode {
    /// One JSON record per step under `<state_dir>/records`.
    #[default]
    File,
    /// Records live for the duration of the process only.
    Memory,
}
