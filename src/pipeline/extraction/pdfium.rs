//! Whole-page rasters through PDFium.
//!
//! The upstream `Pdfium` handle is `!Send`, so the renderer only remembers
//! where the library lives and binds it again for every page.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use pdfium_render::prelude::*;
use tracing::{debug, info};

use super::types::PdfPageRenderer;
use super::ExtractionError;

/// 2× magnification of the 72pt PDF unit.
pub const DEFAULT_RENDER_DPI: u32 = 144;

const POINTS_PER_INCH: f32 = 72.0;

/// Longest rendered edge; larger pages are scaled down to fit.
const MAX_EDGE_PX: i32 = 4096;

const LIBRARY_ENV: &str = "PDFIUM_DYNAMIC_LIB_PATH";

pub struct PdfiumRenderer {
    /// `None` binds from the system search path.
    library: Option<PathBuf>,
}

impl PdfiumRenderer {
    /// Find a loadable PDFium: `explicit`, then `PDFIUM_DYNAMIC_LIB_PATH`,
    /// then next to the executable, then the system search path.
    pub fn locate(explicit: Option<&Path>) -> Result<Self, ExtractionError> {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        let env = std::env::var_os(LIBRARY_ENV).map(PathBuf::from);

        for path in library_candidates(explicit, env, exe_dir.as_deref()) {
            if Pdfium::bind_to_library(&path).is_ok() {
                info!(library = %path.display(), "PDFium loaded");
                return Ok(Self {
                    library: Some(path),
                });
            }
            debug!(library = %path.display(), "PDFium not loadable here");
        }

        Pdfium::bind_to_system_library().map_err(|e| unavailable(format!(
            "PDFium not found; set {LIBRARY_ENV} or images.pdfium_library: {e}"
        )))?;
        info!("PDFium loaded from system library path");
        Ok(Self { library: None })
    }

    pub fn library(&self) -> Option<&Path> {
        self.library.as_deref()
    }

    fn bind(&self) -> Result<Pdfium, ExtractionError> {
        let bindings = match &self.library {
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| unavailable(e.to_string()))?;
        Ok(Pdfium::new(bindings))
    }
}

impl PdfPageRenderer for PdfiumRenderer {
    fn render_page(&self, pdf_bytes: &[u8], page_number: usize, dpi: u32) -> Result<Vec<u8>, ExtractionError> {
        let render_err = |reason: String| ExtractionError::PdfRendering {
            page: page_number,
            reason,
        };

        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf_bytes, None)
            .map_err(document_error)?;

        let index = u16::try_from(page_number)
            .map_err(|_| render_err(format!("page index {page_number} too large")))?;
        let page = document
            .pages()
            .get(index)
            .map_err(|e| render_err(format!("no such page: {e}")))?;

        let config = PdfRenderConfig::new()
            .scale_page_by_factor(zoom_for_dpi(dpi))
            .set_maximum_width(MAX_EDGE_PX)
            .set_maximum_height(MAX_EDGE_PX);
        let raster = page
            .render_with_config(&config)
            .map_err(|e| render_err(e.to_string()))?
            .as_image();

        let png = encode_png(&raster)?;
        debug!(
            page = page_number + 1,
            width = raster.width(),
            height = raster.height(),
            png_size = png.len(),
            "Page rasterized"
        );
        Ok(png)
    }
}

/// Library paths to try, in priority order.
fn library_candidates(explicit: Option<&Path>, env: Option<PathBuf>, exe_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = explicit.map(Path::to_path_buf).into_iter().collect();
    candidates.extend(env);
    if let Some(dir) = exe_dir {
        for d in [dir.to_path_buf(), dir.join("lib")] {
            candidates.push(PathBuf::from(Pdfium::pdfium_platform_library_name_at_path(&d)));
        }
    }
    candidates
}

/// Render scale for `dpi`; 72 DPI is 1.0.
pub fn zoom_for_dpi(dpi: u32) -> f32 {
    (dpi.max(1) as f32) / POINTS_PER_INCH
}

fn unavailable(reason: String) -> ExtractionError {
    ExtractionError::PdfRendering { page: 0, reason }
}

fn document_error(e: PdfiumError) -> ExtractionError {
    let msg = e.to_string();
    if msg.to_lowercase().contains("password") {
        ExtractionError::PdfEncrypted
    } else {
        ExtractionError::PdfParsing(msg)
    }
}

pub(crate) fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ExtractionError> {
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

/// Returns the same raster for every page below `page_count`.
#[cfg(test)]
pub(crate) struct MockPdfPageRenderer {
    page_count: usize,
    png: Vec<u8>,
}

#[cfg(test)]
impl MockPdfPageRenderer {
    /// A 1x1 white page, far below the full-page size threshold.
    pub fn new(page_count: usize) -> Self {
        let white = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(1, 1, image::Luma([255])));
        Self::with_image(page_count, &white)
    }

    pub fn with_image(page_count: usize, img: &DynamicImage) -> Self {
        Self {
            page_count,
            png: encode_png(img).unwrap(),
        }
    }
}

#[cfg(test)]
impl PdfPageRenderer for MockPdfPageRenderer {
    fn render_page(&self, _pdf_bytes: &[u8], page_number: usize, _dpi: u32) -> Result<Vec<u8>, ExtractionError> {
        if page_number >= self.page_count {
            return Err(ExtractionError::PdfRendering {
                page: page_number,
                reason: "out of range".into(),
            });
        }
        Ok(self.png.clone())
    }
}
