use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};

use super::types::{PageText, PdfExtractor};
use super::ExtractionError;
use crate::pipeline::panic_message;

/// PDF text extractor using the pdf-extract crate.
/// Handles digital PDFs with embedded text layers.
pub struct PdfTextExtractor;

impl PdfExtractor for PdfTextExtractor {
    fn extract_text(&self, pdf_bytes: &[u8]) -> Result<Vec<PageText>, ExtractionError> {
        let page_texts = parse_pages(|| pdf_extract::extract_text_from_mem_by_pages(pdf_bytes))?;

        Ok(page_texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| PageText {
                page_number: i + 1,
                text,
            })
            .collect())
    }
}

/// Run a text parser, turning both its errors and its panics into
/// `PdfParsing`. pdf-extract panics on some malformed content streams.
fn parse_pages<E: Display>(
    parse: impl FnOnce() -> Result<Vec<String>, E>,
) -> Result<Vec<String>, ExtractionError> {
    match panic::catch_unwind(AssertUnwindSafe(parse)) {
        Ok(result) => result.map_err(|e| ExtractionError::PdfParsing(e.to_string())),
        Err(payload) => Err(ExtractionError::PdfParsing(format!(
            "pdf-extract panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}
