use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "docsift";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "docsift=info"
}

/// Per-user data directory (`<data dir>/docsift`), falling back to the
/// working directory when the platform has none.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Top-level configuration, built once at startup and shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Directory watched for incoming documents.
    pub watch_dir: PathBuf,
    /// Persisted set of fully ingested filenames.
    pub ledger_path: PathBuf,
    /// JSON-lines file receiving chunked content units.
    pub output_path: PathBuf,
    /// Wait after an event before reading the file.
    pub settle_delay_ms: u64,
    /// Concurrent ingestion workers.
    pub workers: usize,
    /// Submit files already present in `watch_dir` at startup.
    pub scan_existing: bool,
    pub ocr: OcrConfig,
    pub images: ImageConfig,
    pub tables: TableConfig,
    pub chunking: ChunkingConfig,
    pub quality: QualityConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("data/books"),
            ledger_path: app_data_dir().join("processed_files.json"),
            output_path: app_data_dir().join("content_units.jsonl"),
            settle_delay_ms: 3000,
            workers: 2,
            scan_existing: false,
            ocr: OcrConfig::default(),
            images: ImageConfig::default(),
            tables: TableConfig::default(),
            chunking: ChunkingConfig::default(),
            quality: QualityConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Load from a TOML file, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if !(0.0..=1.0).contains(&self.quality.min_relevance) {
            return Err(ConfigError::Invalid(
                "quality.min_relevance must be within 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Explicit tessdata directory; searched for when absent.
    pub tessdata_dir: Option<PathBuf>,
    /// Tesseract language list, e.g. `eng` or `eng+fra`.
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tessdata_dir: None,
            language: "eng".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Full-page raster resolution; 144 DPI is 2× the 72pt PDF unit.
    pub full_page_dpi: u32,
    /// Full-page rasters whose PNG is not larger than this are dropped.
    pub min_full_page_bytes: usize,
    /// Where transient image files go (system temp dir when absent).
    pub temp_dir: Option<PathBuf>,
    /// Explicit PDFium shared library; searched for when absent.
    pub pdfium_library: Option<PathBuf>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            full_page_dpi: 144,
            min_full_page_bytes: 10_000,
            temp_dir: None,
            pdfium_library: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Probe for the native table backends at startup instead of
    /// trusting `tabula`/`camelot`.
    pub detect_backends: bool,
    pub tabula: bool,
    pub camelot: bool,
    /// Java launcher used for tabula.
    pub java: String,
    /// Path to the tabula-java jar.
    pub tabula_jar: Option<PathBuf>,
    /// Python interpreter with camelot installed.
    pub python: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            detect_backends: true,
            tabula: false,
            camelot: false,
            java: "java".to_string(),
            tabula_jar: None,
            python: "python3".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window size in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive windows.
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 300,
            chunk_overlap: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub min_relevance: f32,
    pub min_length: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_relevance: 0.1,
            min_length: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = IngestConfig::default();
        assert_eq!(config.settle_delay(), Duration::from_secs(3));
        assert_eq!(config.images.full_page_dpi, 144);
        assert_eq!(config.images.min_full_page_bytes, 10_000);
        assert_eq!(config.chunking.chunk_size, 300);
        assert_eq!(config.chunking.chunk_overlap, 100);
        assert!((config.quality.min_relevance - 0.1).abs() < f32::EPSILON);
        assert_eq!(config.quality.min_length, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn state_files_live_under_app_data() {
        let config = IngestConfig::default();
        assert!(config.ledger_path.starts_with(app_data_dir()));
        assert!(config.ledger_path.ends_with("processed_files.json"));
        assert!(app_data_dir().ends_with("docsift"));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = IngestConfig::from_toml_str(
            r#"
            watch_dir = "/srv/inbox"
            workers = 4

            [tables]
            detect_backends = false
            camelot = true
            "#,
        )
        .unwrap();

        assert_eq!(config.watch_dir, PathBuf::from("/srv/inbox"));
        assert_eq!(config.workers, 4);
        assert!(config.tables.camelot);
        assert!(!config.tables.tabula);
        assert_eq!(config.tables.python, "python3");
        assert_eq!(config.settle_delay_ms, 3000);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docsift.toml");
        std::fs::write(&path, "settle_delay_ms = 10\n[quality]\nmin_length = 5\n").unwrap();

        let config = IngestConfig::load(Some(&path)).unwrap();
        assert_eq!(config.settle_delay_ms, 10);
        assert_eq!(config.quality.min_length, 5);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = IngestConfig::load(Some(Path::new("/nonexistent/docsift.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let mut config = IngestConfig::default();
        config.chunking.chunk_overlap = 300;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = IngestConfig::default();
        config.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }
}
