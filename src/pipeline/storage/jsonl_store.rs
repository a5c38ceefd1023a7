//! JSON-lines content store: one record per chunk, appended.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::chunker::WindowChunker;
use super::types::{Chunker, ContentSink};
use super::StorageError;
use crate::pipeline::extraction::{ContentType, ContentUnit, ExtractionMethod};

/// One persisted chunk with its unit's provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub content: String,
    pub source: String,
    pub page: Option<usize>,
    pub content_type: ContentType,
    pub index: Option<usize>,
    pub extraction_method: Option<ExtractionMethod>,
    pub chunk_index: usize,
    pub start_index: usize,
    pub ingested_at: DateTime<Utc>,
}

pub struct JsonlContentStore {
    path: PathBuf,
    chunker: Box<dyn Chunker>,
    // Serialises appends from concurrent workers.
    file: Mutex<File>,
}

impl JsonlContentStore {
    /// Open (creating parents and the file) for appending.
    pub fn open(path: &Path, chunker: Box<dyn Chunker>) -> Result<Self, StorageError> {
        let open_err = |source| StorageError::Open {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(open_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(open_err)?;

        Ok(Self {
            path: path.to_path_buf(),
            chunker,
            file: Mutex::new(file),
        })
    }

    pub fn with_window(path: &Path, size: usize, overlap: usize) -> Result<Self, StorageError> {
        Self::open(path, Box::new(WindowChunker::new(size, overlap)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn records(&self, units: &[ContentUnit]) -> Vec<ChunkRecord> {
        let ingested_at = Utc::now();
        units
            .iter()
            .flat_map(|unit| {
                self.chunker
                    .chunk(unit.content())
                    .into_iter()
                    .map(move |chunk| ChunkRecord {
                        content: chunk.content,
                        source: unit.source().to_string(),
                        page: unit.page(),
                        content_type: unit.content_type(),
                        index: unit.index(),
                        extraction_method: unit.extraction_method(),
                        chunk_index: chunk.chunk_index,
                        start_index: chunk.start_index,
                        ingested_at,
                    })
            })
            .collect()
    }
}

impl ContentSink for JsonlContentStore {
    fn store(&self, source: &str, units: &[ContentUnit]) -> Result<usize, StorageError> {
        let records = self.records(units);

        // Serialise everything first so a bad record never leaves a partial batch.
        let mut buf = Vec::new();
        for record in &records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let file = self
            .file
            .lock()
            .map_err(|_| StorageError::Unavailable("content store lock poisoned".into()))?;
        append_or_rollback(&file, &*file, &buf)?;
        file.sync_data()?;

        debug!(source, units = units.len(), records = records.len(), "Content stored");
        Ok(records.len())
    }
}

/// Write `buf` through `out`, truncating `file` back to its prior length
/// if the write fails part way, so no half-written line is left behind.
fn append_or_rollback(file: &File, mut out: impl Write, buf: &[u8]) -> Result<(), StorageError> {
    let start = file.metadata()?.len();
    if let Err(e) = out.write_all(buf).and_then(|_| out.flush()) {
        if let Err(undo) = file.set_len(start) {
            warn!(error = %undo, "Could not remove partial batch");
        }
        return Err(e.into());
    }
    Ok(())
}

/// Read every record back, in append order.
pub fn read_records(path: &Path) -> Result<Vec<ChunkRecord>, StorageError> {
    let raw = std::fs::read_to_string(path)?;
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(StorageError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::ImageProvenance;

    fn units() -> Vec<ContentUnit> {
        let image = ImageProvenance {
            page: Some(2),
            index: 1,
            method: ExtractionMethod::FullPage,
        };
        vec![
            ContentUnit::text("a.pdf", Some(1), "w".repeat(450)),
            ContentUnit::image_table("a.pdf", &image, "x | y\nz | w".into()),
        ]
    }

    #[test]
    fn units_are_chunked_and_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("units.jsonl");
        let store = JsonlContentStore::with_window(&path, 300, 100).unwrap();

        assert_eq!(store.store("a.pdf", &units()).unwrap(), 3);
        assert_eq!(store.store("a.pdf", &units()[1..]).unwrap(), 1);

        let records = read_records(store.path()).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].content_type, ContentType::Text);
        assert_eq!(records[1].start_index, 200);
        assert_eq!(records[1].chunk_index, 1);
        assert_eq!(records[2].content_type, ContentType::ImageTable);
        assert_eq!(records[2].page, Some(2));
        assert_eq!(records[2].extraction_method, Some(ExtractionMethod::FullPage));
    }

    #[test]
    fn reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("units.jsonl");
        JsonlContentStore::with_window(&path, 300, 100)
            .unwrap()
            .store("a.pdf", &units()[1..])
            .unwrap();
        JsonlContentStore::with_window(&path, 300, 100)
            .unwrap()
            .store("b.pdf", &units()[1..])
            .unwrap();

        assert_eq!(read_records(&path).unwrap().len(), 2);
    }

    #[test]
    fn empty_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("units.jsonl");
        let store = JsonlContentStore::with_window(&path, 300, 100).unwrap();
        assert_eq!(store.store("a.pdf", &[]).unwrap(), 0);
        assert!(read_records(&path).unwrap().is_empty());
    }

    /// Accepts `budget` bytes, then fails like a full disk.
    struct ShortWriter<'a> {
        file: &'a File,
        budget: usize,
    }

    impl Write for ShortWriter<'_> {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.budget == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
            }
            let n = buf.len().min(self.budget);
            let written = (&*self.file).write(&buf[..n])?;
            self.budget -= written;
            Ok(written)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_append_leaves_no_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("units.jsonl");
        let store = JsonlContentStore::with_window(&path, 300, 100).unwrap();
        store.store("a.pdf", &units()).unwrap();
        let before = std::fs::metadata(&path).unwrap().len();

        let file = store.file.lock().unwrap();
        let out = ShortWriter { file: &file, budget: 40 };
        let result = append_or_rollback(&file, out, br#"{"content":"this line never finishes","source":"b.pdf"}"#);
        drop(file);

        assert!(matches!(result, Err(StorageError::Io(_))));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), before);
        assert_eq!(read_records(&path).unwrap().len(), 3);

        // The store keeps working after the rollback.
        store.store("b.pdf", &units()[1..]).unwrap();
        assert_eq!(read_records(&path).unwrap().len(), 4);
    }

    #[test]
    fn unwritable_location_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let err = JsonlContentStore::with_window(&blocker.join("units.jsonl"), 300, 100)
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::Open { .. }));
    }
}
