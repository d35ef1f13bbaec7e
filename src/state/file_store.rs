// src/state/file_store.rs

//! One JSON file per step under `<state_dir>/records`.
//!
//! ```text
//! .stepdag/
//!   records/
//!     data___garden_who_2024-01-01_gho-4c7d9e0b1a2f3c5d.json
//! ```
//!
//! The file name is the sanitised identifier plus a prefix of its blake3
//! hash, so two identifiers that sanitise the same never share a file.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::errors::StateError;
use crate::fingerprint::hash_str;
use crate::state::StateStore;
use crate::state::record::BuildRecord;
use crate::step_id::StepId;

const RECORDS_DIR: &str = "records";
const RECORD_EXT: &str = "json";
const TMP_PREFIX: &str = ".tmp-";

#[derive(Debug)]
pub struct FileStateStore {
    records_dir: PathBuf,
    /// Per-identifier write locks, created on first use.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    tmp_counter: AtomicU64,
}

impl FileStateStore {
    /// Open (and create if needed) the store rooted at `state_dir`.
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self, StateError> {
        let records_dir = state_dir.as_ref().join(RECORDS_DIR);
        fs::create_dir_all(&records_dir).map_err(|source| StateError::Io {
            path: records_dir.clone(),
            source,
        })?;
        debug!(dir = ?records_dir, "opened file state store");
        Ok(Self::at(records_dir))
    }

    /// Open the store at `state_dir` for reading only. Nothing is created on
    /// disk; a missing directory simply holds no records.
    pub fn open_read_only(state_dir: impl AsRef<Path>) -> Self {
        let records_dir = state_dir.as_ref().join(RECORDS_DIR);
        debug!(dir = ?records_dir, "opened file state store read-only");
        Self::at(records_dir)
    }

    fn at(records_dir: PathBuf) -> Self {
        Self {
            records_dir,
            locks: Mutex::new(HashMap::new()),
            tmp_counter: AtomicU64::new(0),
        }
    }

    pub fn records_dir(&self) -> &Path {
        &self.records_dir
    }

    /// Where the record of `id` lives.
    pub fn record_path(&self, id: &StepId) -> PathBuf {
        self.records_dir.join(record_file_name(id))
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn temp_path(&self, final_name: &str) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        self.records_dir
            .join(format!("{TMP_PREFIX}{}-{n}-{final_name}", std::process::id()))
    }

    fn read_record(&self, path: &Path, id: Option<&StepId>) -> Result<Option<BuildRecord>, StateError> {
        let label = id.map(|i| i.to_string()).unwrap_or_else(|| path.display().to_string());

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StateError::Corrupt {
                    step: label,
                    path: path.to_path_buf(),
                    reason: format!("unreadable: {e}"),
                });
            }
        };

        let record: BuildRecord =
            serde_json::from_slice(&bytes).map_err(|e| StateError::Corrupt {
                step: label.clone(),
                path: path.to_path_buf(),
                reason: format!("invalid JSON: {e}"),
            })?;

        if let Some(id) = id
            && &record.step != id
        {
            return Err(StateError::Corrupt {
                step: label,
                path: path.to_path_buf(),
                reason: format!("record belongs to '{}'", record.step),
            });
        }

        Ok(Some(record))
    }
}

impl StateStore for FileStateStore {
    fn get(&self, id: &StepId) -> Result<Option<BuildRecord>, StateError> {
        self.read_record(&self.record_path(id), Some(id))
    }

    fn put(&self, id: &StepId, record: &BuildRecord) -> Result<(), StateError> {
        let file_name = record_file_name(id);
        let final_path = self.records_dir.join(&file_name);
        let json = serde_json::to_vec_pretty(record)?;

        let entry_lock = self.lock_for(&file_name);
        let _guard = entry_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let tmp = TempFile::new(self.temp_path(&file_name));
        write_synced(tmp.path(), &json).map_err(|source| StateError::Io {
            path: tmp.path().to_path_buf(),
            source,
        })?;
        fs::rename(tmp.path(), &final_path).map_err(|source| StateError::Io {
            path: final_path.clone(),
            source,
        })?;
        tmp.persisted();

        sync_dir(&self.records_dir).map_err(|source| StateError::Io {
            path: self.records_dir.clone(),
            source,
        })?;

        debug!(
            step = %id,
            fingerprint = %record.fingerprint.short(),
            path = ?final_path,
            "recorded build"
        );
        Ok(())
    }

    fn prune(&self, active: &BTreeSet<StepId>) -> Result<usize, StateError> {
        let entries = fs::read_dir(&self.records_dir).map_err(|source| StateError::Io {
            path: self.records_dir.clone(),
            source,
        })?;

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|source| StateError::Io {
                path: self.records_dir.clone(),
                source,
            })?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();

            if let Some(rest) = name.strip_prefix(TMP_PREFIX) {
                // Temp files of other processes may still be mid-write.
                if temp_owner(rest) == Some(std::process::id()) {
                    debug!(path = ?path, "removing leftover temp file");
                    let _ = fs::remove_file(&path);
                } else {
                    debug!(path = ?path, "leaving temp file of another process");
                }
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }

            match self.read_record(&path, None) {
                Ok(Some(record)) if !active.contains(&record.step) => {
                    let entry_lock = self.lock_for(&name);
                    let _guard = entry_lock.lock().unwrap_or_else(PoisonError::into_inner);
                    fs::remove_file(&path).map_err(|source| StateError::Io {
                        path: path.clone(),
                        source,
                    })?;
                    debug!(step = %record.step, "pruned build record");
                    removed += 1;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(path = ?path, error = %err, "leaving unreadable record in place");
                }
            }
        }

        Ok(removed)
    }
}

/// Process id embedded in a temp file name (after the prefix).
fn temp_owner(rest: &str) -> Option<u32> {
    rest.split('-').next()?.parse().ok()
}

/// `data://garden/who/2024-01-01/gho` -> `data___garden_who_2024-01-01_gho-<16 hex>.json`
fn record_file_name(id: &StepId) -> String {
    let canonical = id.as_str();
    let sanitised: String = canonical
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let digest = hash_str(canonical);
    format!("{sanitised}-{}.{RECORD_EXT}", &digest[..16])
}

/// Removes the file on drop unless it was renamed into place.
struct TempFile {
    path: PathBuf,
    keep: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn persisted(mut self) {
        self.keep = true;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Fsync a directory so the rename is durable. No-op off Unix.
fn sync_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(path)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
