//! Native PDF table extraction through external backends.
//!
//! Two independently maintained tools are supported: tabula-java (run as
//! `java -jar`) and camelot (run through a Python interpreter). Which of
//! them may run is decided once, at startup, by a [`TableCapabilities`]
//! descriptor. Each backend's failure is logged and isolated; their
//! outputs are concatenated as-is, so the same table may appear twice.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::types::{framed_block, ContentUnit, ExtractionMethod};
use super::ExtractionError;
use crate::config::TableConfig;

/// Prints `[{"page", "accuracy", "rows"}]` for every table camelot finds.
const CAMELOT_SCRIPT: &str = r#"
import json, sys
import camelot
tables = camelot.read_pdf(sys.argv[1], pages="all")
out = []
for t in tables:
    out.append({
        "page": int(t.page),
        "accuracy": float(t.accuracy),
        "rows": t.df.astype(str).values.tolist(),
    })
json.dump(out, sys.stdout)
"#;

/// Which backends are present on this machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCapabilities {
    pub tabula: bool,
    pub camelot: bool,
}

impl TableCapabilities {
    /// Probe when configured to, otherwise trust the configured flags.
    pub fn from_config(config: &TableConfig) -> Self {
        if config.detect_backends {
            Self::detect(config)
        } else {
            Self {
                tabula: config.tabula,
                camelot: config.camelot,
            }
        }
    }

    /// Check that the tabula jar exists and Java runs, and that the
    /// configured Python can import camelot.
    pub fn detect(config: &TableConfig) -> Self {
        let tabula = config.tabula_jar.as_deref().map_or(false, Path::exists)
            && Command::new(&config.java)
                .arg("-version")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false);

        let camelot = Command::new(&config.python)
            .args(["-c", "import camelot"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);

        let caps = Self { tabula, camelot };
        info!(tabula = caps.tabula, camelot = caps.camelot, "Native table backends");
        caps
    }
}

/// One table as reported by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeTable {
    /// 1-based page, when the backend reports it.
    pub page: Option<usize>,
    /// Backend confidence in percent, when available.
    pub accuracy: Option<f32>,
    pub rows: Vec<Vec<String>>,
}

impl NativeTable {
    /// No rows, or no cell with visible text.
    pub fn is_empty(&self) -> bool {
        self.rows
            .iter()
            .all(|row| row.iter().all(|cell| cell.trim().is_empty()))
    }

    /// Rows as lines, cells joined with ` | `.
    pub fn to_delimited(&self) -> String {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|c| c.trim())
                    .collect::<Vec<_>>()
                    .join(" | ")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A table-detection backend run over a whole PDF file.
pub trait NativeTableBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn method(&self) -> ExtractionMethod;

    fn read_tables(&self, path: &Path) -> Result<Vec<NativeTable>, ExtractionError>;
}

// ── tabula ─────────────────────────────────────────────────

pub struct TabulaBackend {
    java: String,
    jar: Option<PathBuf>,
}

impl TabulaBackend {
    pub fn new(java: &str, jar: Option<PathBuf>) -> Self {
        Self {
            java: java.to_string(),
            jar,
        }
    }
}

impl NativeTableBackend for TabulaBackend {
    fn name(&self) -> &'static str {
        "tabula"
    }

    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::NativeTabula
    }

    fn read_tables(&self, path: &Path) -> Result<Vec<NativeTable>, ExtractionError> {
        let jar = self.jar.as_ref().ok_or_else(|| backend_error(self.name(), "no tabula jar configured"))?;

        let output = Command::new(&self.java)
            .arg("-jar")
            .arg(jar)
            .args(["--pages", "all", "--format", "JSON", "--silent"])
            .arg(path)
            .output()
            .map_err(|e| backend_error(self.name(), format!("failed to start java: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(backend_error(self.name(), stderr.trim()));
        }
        parse_tabula_json(&output.stdout)
    }
}

#[derive(Deserialize)]
struct TabulaTable {
    #[serde(default)]
    page_number: Option<usize>,
    #[serde(default)]
    data: Vec<Vec<TabulaCell>>,
}

#[derive(Deserialize)]
struct TabulaCell {
    #[serde(default)]
    text: String,
}

pub fn parse_tabula_json(raw: &[u8]) -> Result<Vec<NativeTable>, ExtractionError> {
    let tables: Vec<TabulaTable> = serde_json::from_slice(raw)
        .map_err(|e| backend_error("tabula", format!("unreadable output: {e}")))?;

    Ok(tables
        .into_iter()
        .map(|t| NativeTable {
            page: t.page_number,
            accuracy: None,
            rows: t
                .data
                .into_iter()
                .map(|row| row.into_iter().map(|c| c.text).collect())
                .collect(),
        })
        .collect())
}

// ── camelot ────────────────────────────────────────────────

pub struct CamelotBackend {
    python: String,
}

impl CamelotBackend {
    pub fn new(python: &str) -> Self {
        Self {
            python: python.to_string(),
        }
    }
}

impl NativeTableBackend for CamelotBackend {
    fn name(&self) -> &'static str {
        "camelot"
    }

    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::NativeCamelot
    }

    fn read_tables(&self, path: &Path) -> Result<Vec<NativeTable>, ExtractionError> {
        let output = Command::new(&self.python)
            .arg("-c")
            .arg(CAMELOT_SCRIPT)
            .arg(path)
            .output()
            .map_err(|e| backend_error(self.name(), format!("failed to start python: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(backend_error(self.name(), stderr.trim()));
        }
        parse_camelot_json(&output.stdout)
    }
}

#[derive(Deserialize)]
struct CamelotTable {
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    accuracy: Option<f32>,
    #[serde(default)]
    rows: Vec<Vec<String>>,
}

pub fn parse_camelot_json(raw: &[u8]) -> Result<Vec<NativeTable>, ExtractionError> {
    let tables: Vec<CamelotTable> = serde_json::from_slice(raw)
        .map_err(|e| backend_error("camelot", format!("unreadable output: {e}")))?;

    Ok(tables
        .into_iter()
        .map(|t| NativeTable {
            page: t.page,
            accuracy: t.accuracy,
            rows: t.rows,
        })
        .collect())
}

fn backend_error(backend: &'static str, reason: impl Into<String>) -> ExtractionError {
    ExtractionError::TableBackend {
        backend,
        reason: reason.into(),
    }
}

// ── Extractor ──────────────────────────────────────────────

/// Runs every available backend over a PDF and tags the results.
pub struct NativeTableExtractor {
    backends: Vec<Box<dyn NativeTableBackend>>,
}

impl NativeTableExtractor {
    /// Only backends marked available in `capabilities` are constructed.
    pub fn new(capabilities: TableCapabilities, config: &TableConfig) -> Self {
        let mut backends: Vec<Box<dyn NativeTableBackend>> = Vec::new();
        if capabilities.tabula {
            backends.push(Box::new(TabulaBackend::new(&config.java, config.tabula_jar.clone())));
        }
        if capabilities.camelot {
            backends.push(Box::new(CamelotBackend::new(&config.python)));
        }
        Self { backends }
    }

    pub fn with_backends(backends: Vec<Box<dyn NativeTableBackend>>) -> Self {
        Self { backends }
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Native table units for `path`, in backend order. Never fails: a
    /// backend error only removes that backend's contribution.
    pub fn extract(&self, source: &str, path: &Path) -> Vec<ContentUnit> {
        let mut units = Vec::new();

        for backend in &self.backends {
            let tables = match backend.read_tables(path) {
                Ok(tables) => tables,
                Err(e) => {
                    warn!(source, backend = backend.name(), error = %e, "Native table backend failed");
                    continue;
                }
            };

            let before = units.len();
            for (i, table) in tables.iter().enumerate() {
                if table.is_empty() {
                    continue;
                }
                units.push(ContentUnit::native_table(
                    source,
                    table.page,
                    i + 1,
                    backend.method(),
                    format_native_table(table, i + 1),
                ));
            }
            debug!(
                source,
                backend = backend.name(),
                tables = units.len() - before,
                "Native tables extracted"
            );
        }

        units
    }
}

/// Text block for one native table, with accuracy in the title if known.
pub fn format_native_table(table: &NativeTable, ordinal: usize) -> String {
    let title = match table.accuracy {
        Some(acc) => format!("NATIVE PDF TABLE {ordinal} - Accuracy: {acc:.1}%"),
        None => format!("NATIVE PDF TABLE {ordinal}"),
    };
    framed_block(&title, &table.to_delimited())
}
