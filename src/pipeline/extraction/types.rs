use std::fmt;

use serde::{Deserialize, Serialize};

use super::ExtractionError;

/// Kind of content carried by a [`ContentUnit`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    NativeTable,
    ImageText,
    ImageTable,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::NativeTable => "native_table",
            Self::ImageText => "image_text",
            Self::ImageTable => "image_table",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a non-text unit was obtained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    EmbeddedObject,
    FullPage,
    NativeTabula,
    NativeCamelot,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmbeddedObject => "embedded_object",
            Self::FullPage => "full_page",
            Self::NativeTabula => "native_tabula",
            Self::NativeCamelot => "native_camelot",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single tagged fragment of extracted document content.
///
/// Units are built once by an extractor and never mutated afterwards;
/// the fields are private and exposed through accessors only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentUnit {
    content: String,
    source: String,
    page: Option<usize>,
    content_type: ContentType,
    index: Option<usize>,
    extraction_method: Option<ExtractionMethod>,
}

impl ContentUnit {
    /// Plain page text. `page` is 1-based, absent for formats without pages.
    pub fn text(source: &str, page: Option<usize>, content: String) -> Self {
        Self {
            content,
            source: source.to_string(),
            page,
            content_type: ContentType::Text,
            index: None,
            extraction_method: None,
        }
    }

    pub fn native_table(
        source: &str,
        page: Option<usize>,
        index: usize,
        method: ExtractionMethod,
        content: String,
    ) -> Self {
        Self {
            content,
            source: source.to_string(),
            page,
            content_type: ContentType::NativeTable,
            index: Some(index),
            extraction_method: Some(method),
        }
    }

    pub fn image_text(source: &str, image: &ImageProvenance, content: String) -> Self {
        Self::from_image(source, image, ContentType::ImageText, content)
    }

    pub fn image_table(source: &str, image: &ImageProvenance, content: String) -> Self {
        Self::from_image(source, image, ContentType::ImageTable, content)
    }

    fn from_image(
        source: &str,
        image: &ImageProvenance,
        content_type: ContentType,
        content: String,
    ) -> Self {
        Self {
            content,
            source: source.to_string(),
            page: image.page,
            content_type,
            index: Some(image.index),
            extraction_method: Some(image.method),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn page(&self) -> Option<usize> {
        self.page
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn extraction_method(&self) -> Option<ExtractionMethod> {
        self.extraction_method
    }
}

/// Width of the `=` rulers framing table and OCR blocks.
const BLOCK_RULE_WIDTH: usize = 50;

/// Frame `body` as `\n[title]\n====\nbody\n====\n`.
pub fn framed_block(title: &str, body: &str) -> String {
    let rule = "=".repeat(BLOCK_RULE_WIDTH);
    format!("\n[{title}]\n{rule}\n{body}\n{rule}\n")
}

/// Where an image candidate came from: page (1-based), ordinal and method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageProvenance {
    pub page: Option<usize>,
    pub index: usize,
    pub method: ExtractionMethod,
}

/// Pixel-space rectangle, used for OCR word boxes and table cells.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// A cell of a detected table grid.
pub type CellBoundingBox = BoundingBox;

/// Cells indexed `[row][column]`, rows top-to-bottom, columns left-to-right.
pub type CellGrid = Vec<Vec<CellBoundingBox>>;

/// Page segmentation strategy requested from the OCR engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrMode {
    /// Let the engine segment the page (whole images).
    Auto,
    /// Treat the input as one uniform block of text (table cells).
    SingleBlock,
}

/// One recognised word with its confidence (0.0-1.0) and position.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWordResult {
    pub text: String,
    pub confidence: f32,
    pub bounding_box: Option<BoundingBox>,
}

/// Raw OCR result from the engine
#[derive(Debug, Clone)]
pub struct OcrPageResult {
    pub text: String,
    pub confidence: f32,
    pub word_confidences: Vec<OcrWordResult>,
}

/// OCR engine abstraction (allows mocking for tests)
pub trait OcrEngine: Send + Sync {
    fn ocr_image(&self, image_bytes: &[u8], mode: OcrMode)
        -> Result<OcrPageResult, ExtractionError>;
}

/// Text of one PDF page.
#[derive(Debug, Clone)]
pub struct PageText {
    /// 1-based.
    pub page_number: usize,
    pub text: String,
}

/// PDF text extraction abstraction
pub trait PdfExtractor: Send + Sync {
    fn extract_text(&self, pdf_bytes: &[u8]) -> Result<Vec<PageText>, ExtractionError>;
}

/// Renders a whole PDF page to PNG bytes.
pub trait PdfPageRenderer: Send + Sync {
    /// `page_number` is 0-based.
    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_number: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_unit_serializes_snake_case_tags() {
        let image = ImageProvenance {
            page: Some(2),
            index: 1,
            method: ExtractionMethod::FullPage,
        };
        let unit = ContentUnit::image_table("report.pdf", &image, "a | b".into());
        let json = serde_json::to_value(&unit).unwrap();

        assert_eq!(json["content_type"], "image_table");
        assert_eq!(json["extraction_method"], "full_page");
        assert_eq!(json["page"], 2);
        assert_eq!(json["index"], 1);
        assert_eq!(json["source"], "report.pdf");
    }

    #[test]
    fn text_unit_has_no_index_or_method() {
        let unit = ContentUnit::text("notes.docx", None, "hello".into());
        assert_eq!(unit.content_type(), ContentType::Text);
        assert_eq!(unit.index(), None);
        assert_eq!(unit.extraction_method(), None);
        assert_eq!(unit.page(), None);
    }

    #[test]
    fn framed_block_layout() {
        let block = framed_block("NATIVE PDF TABLE 1", "a | b");
        let rule = "=".repeat(50);
        assert_eq!(block, format!("\n[NATIVE PDF TABLE 1]\n{rule}\na | b\n{rule}\n"));
    }

    #[test]
    fn display_matches_serde_names() {
        assert_eq!(ContentType::NativeTable.to_string(), "native_table");
        assert_eq!(ExtractionMethod::NativeCamelot.to_string(), "native_camelot");
        assert_eq!(ExtractionMethod::EmbeddedObject.as_str(), "embedded_object");
    }
}
