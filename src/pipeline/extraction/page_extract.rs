//! Per-page PDF decoding into text units and image candidates.
//!
//! Candidates are written to named temporary files. The files live exactly
//! as long as the [`ImageCandidate`] that owns them: dropping or
//! discarding a candidate deletes its file.

use std::io::Write;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use lopdf::{Document, ObjectId};
use tempfile::TempPath;
use tracing::{debug, warn};

use super::pdf_renderer::LopdfImageExtractor;
use super::pdfium::{encode_png, DEFAULT_RENDER_DPI};
use super::types::{
    ContentUnit, ExtractionMethod, ImageProvenance, PageText, PdfExtractor, PdfPageRenderer,
};
use super::ExtractionError;
use crate::config::ImageConfig;

/// Full-page rasters must be larger than this to be kept.
pub const MIN_FULL_PAGE_BYTES: usize = 10_000;

#[derive(Debug, Clone)]
pub struct PageImageSettings {
    pub full_page_dpi: u32,
    pub min_full_page_bytes: usize,
    pub temp_dir: Option<PathBuf>,
}

impl Default for PageImageSettings {
    fn default() -> Self {
        Self {
            full_page_dpi: DEFAULT_RENDER_DPI,
            min_full_page_bytes: MIN_FULL_PAGE_BYTES,
            temp_dir: None,
        }
    }
}

impl From<&ImageConfig> for PageImageSettings {
    fn from(config: &ImageConfig) -> Self {
        Self {
            full_page_dpi: config.full_page_dpi,
            min_full_page_bytes: config.min_full_page_bytes,
            temp_dir: config.temp_dir.clone(),
        }
    }
}

/// An image awaiting OCR, backed by a temporary PNG file.
pub struct ImageCandidate {
    provenance: ImageProvenance,
    file: TempPath,
}

impl ImageCandidate {
    /// Write `png` to a fresh temporary file.
    pub fn from_png(
        provenance: ImageProvenance,
        png: &[u8],
        temp_dir: Option<&Path>,
    ) -> Result<Self, ExtractionError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("docsift-").suffix(".png");
        let mut file = match temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(png)?;
        file.flush()?;

        Ok(Self {
            provenance,
            file: file.into_temp_path(),
        })
    }

    pub fn from_image(
        provenance: ImageProvenance,
        image: &DynamicImage,
        temp_dir: Option<&Path>,
    ) -> Result<Self, ExtractionError> {
        Self::from_png(provenance, &encode_png(image)?, temp_dir)
    }

    pub fn provenance(&self) -> &ImageProvenance {
        &self.provenance
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    /// Delete the backing file now, reporting any filesystem error.
    pub fn discard(self) -> std::io::Result<()> {
        self.file.close()
    }
}

/// Text unit (if any) and image candidates of one page.
pub struct ExtractedPage {
    /// 1-based.
    pub number: usize,
    pub text: Option<ContentUnit>,
    pub images: Vec<ImageCandidate>,
}

/// Decodes PDFs page by page.
pub struct PageImageExtractor {
    text_extractor: Box<dyn PdfExtractor>,
    renderer: Option<Box<dyn PdfPageRenderer>>,
    images: LopdfImageExtractor,
    settings: PageImageSettings,
}

impl PageImageExtractor {
    /// `renderer` is optional: without PDFium no full-page candidates are made.
    pub fn new(
        text_extractor: Box<dyn PdfExtractor>,
        renderer: Option<Box<dyn PdfPageRenderer>>,
        settings: PageImageSettings,
    ) -> Self {
        Self {
            text_extractor,
            renderer,
            images: LopdfImageExtractor,
            settings,
        }
    }

    pub fn temp_dir(&self) -> Option<&Path> {
        self.settings.temp_dir.as_deref()
    }

    /// Decode the document. Failure here is a file-level failure.
    pub fn open<'a>(&'a self, source: &str, pdf_bytes: &'a [u8]) -> Result<PdfPages<'a>, ExtractionError> {
        let doc = Document::load_mem(pdf_bytes)
            .map_err(|e| ExtractionError::PdfParsing(format!("Failed to parse PDF: {e}")))?;
        let texts = self.text_extractor.extract_text(pdf_bytes)?;
        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();

        debug!(source, pages = page_ids.len(), "Opened PDF");

        Ok(PdfPages {
            extractor: self,
            source: source.to_string(),
            bytes: pdf_bytes,
            doc,
            page_ids,
            texts,
        })
    }
}

/// An opened PDF, yielding one [`ExtractedPage`] at a time.
pub struct PdfPages<'a> {
    extractor: &'a PageImageExtractor,
    source: String,
    bytes: &'a [u8],
    doc: Document,
    page_ids: Vec<ObjectId>,
    texts: Vec<PageText>,
}

impl<'a> PdfPages<'a> {
    pub fn len(&self) -> usize {
        self.page_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.page_ids.is_empty()
    }

    /// Extract page `index` (0-based). Image failures are logged and skipped.
    pub fn page(&self, index: usize) -> ExtractedPage {
        let number = index + 1;
        let text = self
            .texts
            .iter()
            .find(|t| t.page_number == number)
            .filter(|t| !t.text.trim().is_empty())
            .map(|t| ContentUnit::text(&self.source, Some(number), t.text.clone()));

        let mut images = self.embedded_candidates(index);
        if let Some(candidate) = self.full_page_candidate(index, images.len() + 1) {
            images.push(candidate);
        }

        ExtractedPage {
            number,
            text,
            images,
        }
    }

    fn embedded_candidates(&self, index: usize) -> Vec<ImageCandidate> {
        let number = index + 1;
        let Some(&page_id) = self.page_ids.get(index) else {
            return Vec::new();
        };

        self.extractor
            .images
            .page_images(&self.doc, page_id, number)
            .into_iter()
            .filter_map(|embedded| {
                let provenance = ImageProvenance {
                    page: Some(number),
                    index: embedded.ordinal,
                    method: ExtractionMethod::EmbeddedObject,
                };
                ImageCandidate::from_image(provenance, &embedded.image, self.extractor.temp_dir())
                    .map_err(|e| {
                        warn!(
                            source = %self.source,
                            page = number,
                            index = embedded.ordinal,
                            error = %e,
                            "Failed to stage embedded image"
                        )
                    })
                    .ok()
            })
            .collect()
    }

    fn full_page_candidate(&self, index: usize, ordinal: usize) -> Option<ImageCandidate> {
        let number = index + 1;
        let renderer = self.extractor.renderer.as_ref()?;
        let settings = &self.extractor.settings;

        let png = match renderer.render_page(self.bytes, index, settings.full_page_dpi) {
            Ok(png) => png,
            Err(e) => {
                warn!(source = %self.source, page = number, error = %e, "Full-page render failed");
                return None;
            }
        };

        if png.len() <= settings.min_full_page_bytes {
            debug!(
                source = %self.source,
                page = number,
                png_size = png.len(),
                "Full-page raster too small, mostly text"
            );
            return None;
        }

        let provenance = ImageProvenance {
            page: Some(number),
            index: ordinal,
            method: ExtractionMethod::FullPage,
        };
        ImageCandidate::from_png(provenance, &png, self.extractor.temp_dir())
            .map_err(|e| {
                warn!(source = %self.source, page = number, error = %e, "Failed to stage page raster")
            })
            .ok()
    }
}
