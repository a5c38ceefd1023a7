//! Durable record of fully ingested filenames.
//!
//! The ledger is a JSON array of names. Every update rewrites the whole
//! file through a temporary sibling and an atomic rename, under one lock,
//! so concurrent completions never lose each other's entries.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{info, warn};

use super::ImportError;

pub struct ProcessedLedger {
    path: PathBuf,
    entries: Mutex<BTreeSet<String>>,
}

impl ProcessedLedger {
    /// Load from `path`. A missing file is an empty ledger; an unreadable
    /// one is an error; a corrupt one is logged and treated as empty.
    pub fn load(path: &Path) -> Result<Self, ImportError> {
        let entries = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(names) => names.into_iter().collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ledger is corrupt, starting empty");
                    BTreeSet::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(source) => {
                return Err(ImportError::LedgerRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        info!(path = %path.display(), entries = entries.len(), "Ledger loaded");
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add `name` and persist before returning. The in-memory set only
    /// changes once the file is on disk. Returns `false` if already present.
    pub fn record(&self, name: &str) -> Result<bool, ImportError> {
        let mut entries = self.lock();
        if entries.contains(name) {
            return Ok(false);
        }

        let mut updated = entries.clone();
        updated.insert(name.to_string());
        self.persist(&updated)?;
        *entries = updated;
        Ok(true)
    }

    // The set is only replaced after a successful write, so a panicking
    // holder cannot leave it half updated.
    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, entries: &BTreeSet<String>) -> Result<(), ImportError> {
        let write_err = |source| ImportError::LedgerWrite {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let json = serde_json::to_vec_pretty(&entries.iter().collect::<Vec<_>>())?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = File::create(&tmp).map_err(write_err)?;
        file.write_all(&json).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);

        std::fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }
}
