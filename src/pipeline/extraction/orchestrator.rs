use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;
use tracing::{debug, info, warn};

use super::docx::DocxExtractor;
use super::native_tables::{NativeTableExtractor, TableCapabilities};
use super::ocr::CellOcrExtractor;
use super::page_extract::{ImageCandidate, PageImageExtractor, PageImageSettings};
use super::pdf::PdfTextExtractor;
use super::preprocess::to_binary_mask;
use super::table_detect::TableStructureDetector;
use super::types::{
    framed_block, ContentUnit, ExtractionMethod, ImageProvenance, OcrEngine, OcrMode,
    OcrWordResult, PdfPageRenderer,
};
use super::ExtractionError;
use crate::config::IngestConfig;
use crate::pipeline::import::format::SupportedFormat;

/// Fewer text-bearing rows than this and an image is not a table.
const MIN_TABLE_ROWS: usize = 2;

/// Turns one document file into its ordered content units.
pub trait DocumentPipeline: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Vec<ContentUnit>, ExtractionError>;
}

/// Assembles content units from every extractor.
///
/// PDF output order: native tables, then for each page its text unit
/// followed by the units of that page's images in candidate order.
pub struct DocumentExtractor {
    pages: PageImageExtractor,
    native_tables: NativeTableExtractor,
    ocr: Arc<dyn OcrEngine>,
    detector: TableStructureDetector,
    docx: DocxExtractor,
}

impl DocumentExtractor {
    pub fn new(
        pages: PageImageExtractor,
        native_tables: NativeTableExtractor,
        ocr: Arc<dyn OcrEngine>,
    ) -> Self {
        Self {
            pages,
            native_tables,
            ocr,
            detector: TableStructureDetector::default(),
            docx: DocxExtractor,
        }
    }

    /// Wire the production extractors from configuration. Native table
    /// backends are detected here, once.
    pub fn from_config(
        config: &IngestConfig,
        ocr: Arc<dyn OcrEngine>,
        renderer: Option<Box<dyn PdfPageRenderer>>,
    ) -> Self {
        let pages = PageImageExtractor::new(
            Box::new(PdfTextExtractor),
            renderer,
            PageImageSettings::from(&config.images),
        );
        let capabilities = TableCapabilities::from_config(&config.tables);
        Self::new(pages, NativeTableExtractor::new(capabilities, &config.tables), ocr)
    }

    pub fn extract_pdf(
        &self,
        source: &str,
        path: &Path,
        bytes: &[u8],
    ) -> Result<Vec<ContentUnit>, ExtractionError> {
        let pages = self.pages.open(source, bytes)?;
        let mut units = self.native_tables.extract(source, path);

        for index in 0..pages.len() {
            let page = pages.page(index);
            debug!(source, page = page.number, images = page.images.len(), "Page extracted");
            units.extend(page.text);
            for candidate in page.images {
                units.extend(self.process_image(source, candidate));
            }
        }
        Ok(units)
    }

    pub fn extract_docx(&self, source: &str, bytes: &[u8]) -> Result<Vec<ContentUnit>, ExtractionError> {
        let content = self.docx.extract(bytes)?;
        let mut units = Vec::new();
        if !content.text.trim().is_empty() {
            units.push(ContentUnit::text(source, None, content.text));
        }

        for (i, image) in content.media.iter().enumerate() {
            let provenance = ImageProvenance {
                page: None,
                index: i + 1,
                method: ExtractionMethod::EmbeddedObject,
            };
            match ImageCandidate::from_image(provenance, image, self.pages.temp_dir()) {
                Ok(candidate) => units.extend(self.process_image(source, candidate)),
                Err(e) => warn!(source, index = i + 1, error = %e, "Failed to stage media image"),
            }
        }
        Ok(units)
    }

    /// OCR one candidate into `image_text` / `image_table` units. The
    /// candidate's file is deleted before returning, whatever the outcome.
    pub fn process_image(&self, source: &str, candidate: ImageCandidate) -> Vec<ContentUnit> {
        let provenance = *candidate.provenance();
        let units = match self.analyse_image(source, &provenance, candidate.path()) {
            Ok(units) => units,
            Err(e) => {
                warn!(
                    source,
                    page = ?provenance.page,
                    index = provenance.index,
                    method = %provenance.method,
                    error = %e,
                    "Image extraction failed"
                );
                Vec::new()
            }
        };

        if let Err(e) = candidate.discard() {
            warn!(source, index = provenance.index, error = %e, "Failed to delete temporary image");
        }
        units
    }

    fn analyse_image(
        &self,
        source: &str,
        provenance: &ImageProvenance,
        path: &Path,
    ) -> Result<Vec<ContentUnit>, ExtractionError> {
        let bytes = std::fs::read(path)?;
        let image = image::load_from_memory(&bytes)
            .map_err(|e| ExtractionError::ImageProcessing(format!("Cannot decode image: {e}")))?;

        let mut units = Vec::new();
        let whole = self.ocr.ocr_image(&bytes, OcrMode::Auto)?;
        let text = whole.text.trim();
        if !text.is_empty() {
            let title = image_title("IMAGE TEXT", provenance);
            units.push(ContentUnit::image_text(source, provenance, framed_block(&title, text)));
        }

        let mut rows = self.grid_rows(&image);
        if rows.len() < MIN_TABLE_ROWS {
            rows = word_rows(&whole.word_confidences);
        }
        if rows.len() >= MIN_TABLE_ROWS {
            let title = image_title("IMAGE TABLE", provenance);
            units.push(ContentUnit::image_table(
                source,
                provenance,
                framed_block(&title, &rows.join("\n")),
            ));
        }
        Ok(units)
    }

    /// Rows of the detected cell grid that carry any text, cells joined
    /// with ` | `. Empty when no grid is found.
    pub fn grid_rows(&self, image: &DynamicImage) -> Vec<String> {
        let grid = self.detector.detect(&to_binary_mask(image));
        if grid.is_empty() {
            return Vec::new();
        }

        let cells = CellOcrExtractor::new(self.ocr.as_ref());
        grid.iter()
            .map(|row| {
                row.iter()
                    .map(|cell| cells.extract_cell_text(image, cell))
                    .collect::<Vec<_>>()
            })
            .filter(|texts| texts.iter().any(|t| !t.is_empty()))
            .map(|texts| texts.join(" | "))
            .collect()
    }
}

impl DocumentPipeline for DocumentExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<ContentUnit>, ExtractionError> {
        let format = SupportedFormat::from_path(path)
            .ok_or_else(|| ExtractionError::UnsupportedFormat(path.display().to_string()))?;
        let source = source_name(path);
        let bytes = std::fs::read(path)?;

        if !format.matches_magic(&bytes) {
            return Err(ExtractionError::UnsupportedFormat(format!(
                "{source} does not look like a {format} file"
            )));
        }

        let units = match format {
            SupportedFormat::Pdf => self.extract_pdf(&source, path, &bytes)?,
            SupportedFormat::Docx => self.extract_docx(&source, &bytes)?,
        };
        info!(source = %source, format = %format, units = units.len(), "Document extracted");
        Ok(units)
    }
}

/// File name used as the unit source and ledger key.
pub fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn image_title(kind: &str, provenance: &ImageProvenance) -> String {
    match provenance.page {
        Some(page) => format!("{kind} from Image {} on page {page}", provenance.index),
        None => format!("{kind} from Image {}", provenance.index),
    }
}

/// Whole-image OCR words with positive confidence, grouped into lines by
/// their exact top coordinate, top to bottom.
pub fn word_rows(words: &[OcrWordResult]) -> Vec<String> {
    let mut lines: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
    for word in words {
        let text = word.text.trim();
        if word.confidence <= 0.0 || text.is_empty() {
            continue;
        }
        if let Some(bbox) = &word.bounding_box {
            lines.entry(bbox.y).or_default().push(text);
        }
    }
    lines.into_values().map(|line| line.join(" | ")).collect()
}
