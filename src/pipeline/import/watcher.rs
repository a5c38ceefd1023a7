//! Directory watching via `notify`.
//!
//! The watcher only produces events; the dispatcher in the orchestrator
//! turns them into candidate paths with [`candidate_paths`].

use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::info;

use super::format::is_supported;
use super::ImportError;

/// Keeps the OS watch alive; dropping it stops event delivery.
pub struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
    dir: PathBuf,
}

impl DirectoryWatcher {
    /// Watch `dir` (non-recursively), sending raw events to `tx`.
    pub fn start(dir: &Path, tx: Sender<notify::Result<Event>>) -> Result<Self, ImportError> {
        if !dir.is_dir() {
            return Err(ImportError::WatchDirMissing(dir.to_path_buf()));
        }
        let mut watcher = notify::recommended_watcher(tx)?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), "Watching for documents");

        Ok(Self {
            _watcher: watcher,
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Supported-format paths an event introduces or changes.
///
/// Creation and move-in are the primary triggers. Data writes also count:
/// they let a file that failed earlier be retried once it changes.
pub fn candidate_paths(event: &Event) -> Vec<PathBuf> {
    let paths: Vec<&PathBuf> = match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => event.paths.iter().collect(),
        // Both carries [from, to]
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event.paths.last().into_iter().collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.iter().collect(),
        EventKind::Modify(ModifyKind::Data(_)) => event.paths.iter().collect(),
        _ => Vec::new(),
    };

    paths
        .into_iter()
        .filter(|p| is_supported(p))
        .cloned()
        .collect()
}

/// Supported files already present in `dir`, sorted by name.
pub fn existing_files(dir: &Path) -> Result<Vec<PathBuf>, ImportError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_supported(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
