pub mod format;
pub mod ledger;
pub mod inflight;
pub mod watcher;
pub mod orchestrator;

pub use format::*;
pub use ledger::*;
pub use inflight::*;
pub use watcher::*;
pub use orchestrator::*;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot read ledger {path}: {source}")]
    LedgerRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot write ledger {path}: {source}")]
    LedgerWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Ledger serialization error: {0}")]
    LedgerFormat(#[from] serde_json::Error),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Watch directory not found: {0}")]
    WatchDirMissing(PathBuf),

    #[error("Ingestion workers have stopped")]
    WorkersStopped,
}
