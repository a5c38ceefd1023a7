pub mod types;
pub mod preprocess;
pub mod table_detect;
pub mod ocr;
pub mod pdf;
pub mod pdf_renderer;
pub mod pdfium;
pub mod docx;
pub mod page_extract;
pub mod native_tables;
pub mod orchestrator;

pub use types::*;
pub use preprocess::*;
pub use table_detect::*;
pub use ocr::*;
pub use pdf::*;
pub use page_extract::*;
pub use native_tables::*;
pub use orchestrator::*;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tesseract OCR initialization failed: {0}")]
    OcrInit(String),

    #[error("Tesseract OCR configuration error: {0}")]
    OcrConfig(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("PDF is password-protected")]
    PdfEncrypted,

    #[error("Word document parsing failed: {0}")]
    DocxParsing(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Tessdata not found at: {0}")]
    TessdataNotFound(PathBuf),

    #[error("Table backend {backend} failed: {reason}")]
    TableBackend { backend: &'static str, reason: String },

    #[error("Unsupported format for extraction: {0}")]
    UnsupportedFormat(String),
}
