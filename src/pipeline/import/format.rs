use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Document formats accepted by the ingestion pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SupportedFormat {
    Pdf,
    Docx,
}

impl SupportedFormat {
    /// Format implied by the file extension, case-insensitive.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }

    /// Whether `bytes` start with this format's magic number.
    /// DOCX is a ZIP package, so only the `PK` local header is checked.
    pub fn matches_magic(&self, bytes: &[u8]) -> bool {
        match (self, bytes) {
            // %PDF
            (Self::Pdf, [0x25, 0x50, 0x44, 0x46, ..]) => true,
            // PK\x03\x04
            (Self::Docx, [0x50, 0x4B, 0x03, 0x04, ..]) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SupportedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True for paths the watcher should react to.
pub fn is_supported(path: &Path) -> bool {
    SupportedFormat::from_path(path).is_some()
}
