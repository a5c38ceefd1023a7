use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat};

use super::types::{BoundingBox, CellBoundingBox, OcrEngine, OcrMode, OcrPageResult, OcrWordResult};
use super::ExtractionError;
use crate::config::OcrConfig;

/// Cells narrower or shorter than this are never sent to OCR.
pub const MIN_CELL_DIM: u32 = 10;

/// Upscale factor applied to cell crops before recognition.
const CELL_UPSCALE: u32 = 2;

/// Gaussian sigma of the light smoothing after upscaling.
const CELL_BLUR_SIGMA: f32 = 0.5;

/// Tesseract through the C API; one instance is created per call so the
/// engine can be shared between worker threads.
#[cfg(feature = "ocr")]
pub struct TesseractEngine {
    tessdata: String,
    language: String,
}

#[cfg(feature = "ocr")]
impl TesseractEngine {
    /// `language` is a `+`-joined list; every entry needs its traineddata.
    pub fn new(tessdata_dir: &Path, language: &str) -> Result<Self, ExtractionError> {
        let missing = language
            .split('+')
            .any(|lang| !tessdata_dir.join(format!("{lang}.traineddata")).is_file());
        if missing {
            return Err(ExtractionError::TessdataNotFound(tessdata_dir.to_path_buf()));
        }
        let tessdata = tessdata_dir
            .to_str()
            .ok_or_else(|| ExtractionError::OcrInit(format!("non UTF-8 tessdata path {}", tessdata_dir.display())))?;
        Ok(Self {
            tessdata: tessdata.to_string(),
            language: language.to_string(),
        })
    }
}

#[cfg(feature = "ocr")]
impl OcrEngine for TesseractEngine {
    fn ocr_image(&self, image_bytes: &[u8], mode: OcrMode) -> Result<OcrPageResult, ExtractionError> {
        let mut tess = tesseract::Tesseract::new(Some(&self.tessdata), Some(&self.language))
            .map_err(|e| ExtractionError::OcrInit(format!("{e:?}")))?;
        if mode == OcrMode::SingleBlock {
            // PSM 6: one uniform block of text
            tess = tess
                .set_variable("tessedit_pageseg_mode", "6")
                .map_err(|e| ExtractionError::OcrConfig(format!("{e:?}")))?;
        }
        let mut tess = tess.set_image_from_mem(image_bytes).map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))?;

        let text = tess.get_text().map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))?;
        let confidence = tess.mean_text_conf().clamp(0, 100) as f32 / 100.0;
        let word_confidences = tess
            .get_tsv_text(0)
            .map(|tsv| parse_tsv_words(&tsv))
            .unwrap_or_default();

        Ok(OcrPageResult {
            text,
            confidence,
            word_confidences,
        })
    }
}

/// Engine used when Tesseract is not compiled in or not installed.
/// Recognises nothing, so images contribute no units.
pub struct NullOcrEngine;

impl OcrEngine for NullOcrEngine {
    fn ocr_image(&self, _image_bytes: &[u8], _mode: OcrMode) -> Result<OcrPageResult, ExtractionError> {
        Ok(OcrPageResult {
            text: String::new(),
            confidence: 0.0,
            word_confidences: Vec::new(),
        })
    }
}

/// Build the OCR engine once at startup.
///
/// Falls back to [`NullOcrEngine`] when the `ocr` feature is off or no
/// tessdata directory can be found.
pub fn build_ocr_engine(config: &OcrConfig) -> Arc<dyn OcrEngine> {
    #[cfg(feature = "ocr")]
    {
        match find_tessdata_dir(config.tessdata_dir.as_deref(), &config.language) {
            Some(tessdata) => match TesseractEngine::new(&tessdata, &config.language) {
                Ok(engine) => {
                    tracing::info!(
                        tessdata = %tessdata.display(),
                        language = %config.language,
                        "Tesseract OCR initialized"
                    );
                    return Arc::new(engine);
                }
                Err(e) => tracing::warn!(error = %e, "Tesseract OCR unavailable"),
            },
            None => tracing::warn!("Tesseract data not found, images will not be OCR'd"),
        }
    }
    #[cfg(not(feature = "ocr"))]
    let _ = config;

    tracing::info!("Using null OCR engine, image OCR unavailable");
    Arc::new(NullOcrEngine)
}

/// Locate tessdata: explicit setting, then `TESSDATA_PREFIX`, then common
/// system paths. The directory must hold the first configured language.
pub fn find_tessdata_dir(explicit: Option<&Path>, language: &str) -> Option<PathBuf> {
    let lang = language.split('+').next().unwrap_or("eng");
    let traineddata = format!("{lang}.traineddata");

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = explicit {
        candidates.push(dir.to_path_buf());
    }
    if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
        candidates.push(PathBuf::from(prefix));
    }
    candidates.extend(
        [
            "/usr/share/tesseract-ocr/5/tessdata",
            "/usr/share/tesseract-ocr/4.00/tessdata",
            "/usr/share/tessdata",
            "/usr/local/share/tessdata",
            "/opt/homebrew/share/tessdata",
        ]
        .iter()
        .map(PathBuf::from),
    );

    candidates.into_iter().find(|p| p.join(&traineddata).exists())
}

// ── Cell OCR ───────────────────────────────────────────────

/// Recognises the text inside individual table cells.
pub struct CellOcrExtractor<'a> {
    engine: &'a dyn OcrEngine,
}

impl<'a> CellOcrExtractor<'a> {
    pub fn new(engine: &'a dyn OcrEngine) -> Self {
        Self { engine }
    }

    /// Whitespace-normalised text of `cell`, or an empty string when the
    /// cell is too small, falls outside the image, or OCR fails.
    pub fn extract_cell_text(&self, image: &DynamicImage, cell: &CellBoundingBox) -> String {
        if cell.width < MIN_CELL_DIM || cell.height < MIN_CELL_DIM {
            return String::new();
        }

        match self.recognise(image, cell) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    x = cell.x,
                    y = cell.y,
                    width = cell.width,
                    height = cell.height,
                    error = %e,
                    "Cell OCR failed, leaving cell empty"
                );
                String::new()
            }
        }
    }

    fn recognise(&self, image: &DynamicImage, cell: &CellBoundingBox) -> Result<String, ExtractionError> {
        let (img_w, img_h) = image.dimensions();
        if cell.x >= img_w || cell.y >= img_h {
            return Ok(String::new());
        }
        let width = cell.width.min(img_w - cell.x);
        let height = cell.height.min(img_h - cell.y);
        if width < MIN_CELL_DIM || height < MIN_CELL_DIM {
            return Ok(String::new());
        }

        let gray = image.crop_imm(cell.x, cell.y, width, height).to_luma8();
        let upscaled = image::imageops::resize(
            &gray,
            width * CELL_UPSCALE,
            height * CELL_UPSCALE,
            FilterType::CatmullRom,
        );
        let smoothed = image::imageops::blur(&upscaled, CELL_BLUR_SIGMA);

        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(smoothed)
            .write_to(&mut png, ImageOutputFormat::Png)
            .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;

        let result = self.engine.ocr_image(png.get_ref(), OcrMode::SingleBlock)?;
        Ok(normalize_whitespace(&result.text))
    }
}

/// Collapse line breaks and runs of whitespace into single spaces.
pub fn normalize_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Word-level rows (level 5) of Tesseract's TSV output.
///
/// Columns: level, page, block, par, line, word, left, top, width, height,
/// conf, text. Confidence is rescaled to 0.0-1.0 and Tesseract's `-1`
/// ("no confidence") becomes 0.0. Blank words are dropped.
pub fn parse_tsv_words(tsv: &str) -> Vec<OcrWordResult> {
    tsv.lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').collect();
            let [level, _, _, _, _, _, left, top, width, height, conf, text, ..] = cols.as_slice() else {
                return None;
            };
            if level.parse::<u8>().ok()? != 5 || text.trim().is_empty() {
                return None;
            }
            let conf: f32 = conf.trim().parse().ok()?;
            let bounding_box = (|| {
                Some(BoundingBox {
                    x: left.parse().ok()?,
                    y: top.parse().ok()?,
                    width: width.parse().ok()?,
                    height: height.parse().ok()?,
                })
            })();
            Some(OcrWordResult {
                text: text.trim().to_string(),
                confidence: conf.max(0.0) / 100.0,
                bounding_box,
            })
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::{FailingOcrEngine, ScriptedOcrEngine};
    use super::*;
    use image::{Rgb, RgbImage};

    fn canvas() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 100, Rgb([255, 255, 255])))
    }

    fn cell(x: u32, y: u32, width: u32, height: u32) -> CellBoundingBox {
        CellBoundingBox { x, y, width, height }
    }

    #[test]
    fn small_cell_skips_ocr() {
        let engine = FailingOcrEngine::default();
        let text = CellOcrExtractor::new(&engine).extract_cell_text(&canvas(), &cell(10, 10, 5, 5));

        assert_eq!(text, "");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn thin_cell_skips_ocr() {
        let engine = FailingOcrEngine::default();
        let text = CellOcrExtractor::new(&engine).extract_cell_text(&canvas(), &cell(0, 0, 80, 9));
        assert_eq!(text, "");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cell_text_is_normalised_and_single_block() {
        let engine = ScriptedOcrEngine::new("", vec![], &["  Total\r\n 42 \n"]);
        let text = CellOcrExtractor::new(&engine).extract_cell_text(&canvas(), &cell(0, 0, 40, 20));

        assert_eq!(text, "Total 42");
        assert_eq!(*engine.modes.lock().unwrap(), vec![OcrMode::SingleBlock]);
    }

    #[test]
    fn ocr_failure_yields_empty_cell() {
        let engine = FailingOcrEngine::default();
        let text = CellOcrExtractor::new(&engine).extract_cell_text(&canvas(), &cell(0, 0, 40, 40));
        assert_eq!(text, "");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cell_outside_image_is_empty() {
        let engine = FailingOcrEngine::default();
        let text =
            CellOcrExtractor::new(&engine).extract_cell_text(&canvas(), &cell(150, 0, 40, 40));
        assert_eq!(text, "");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cell_overhanging_edge_is_clamped() {
        let engine = ScriptedOcrEngine::new("", vec![], &["edge"]);
        let text = CellOcrExtractor::new(&engine).extract_cell_text(&canvas(), &cell(80, 80, 40, 40));
        assert_eq!(text, "edge");
    }

    #[test]
    fn cell_clamped_below_minimum_skips_ocr() {
        let engine = FailingOcrEngine::default();
        let text = CellOcrExtractor::new(&engine).extract_cell_text(&canvas(), &cell(95, 10, 40, 40));
        assert_eq!(text, "");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn null_engine_recognises_nothing() {
        let result = NullOcrEngine.ocr_image(&[], OcrMode::Auto).unwrap();
        assert!(result.text.is_empty());
        assert!(result.word_confidences.is_empty());
    }

    // ── TSV parsing ──

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
        1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t\n\
        5\t1\t1\t1\t1\t1\t36\t92\t60\t18\t96.5\tName\n\
        5\t1\t1\t1\t1\t2\t120\t92\t70\t18\t91\tValue\n\
        5\t1\t1\t1\t2\t1\t36\t130\t40\t18\t-1\t \n\
        5\t1\t1\t1\t2\t2\t90\t130\t40\t18\t-1\tnoise\n";

    #[test]
    fn tsv_keeps_word_level_rows() {
        let words = parse_tsv_words(TSV);
        assert_eq!(words.len(), 3);
        assert_eq!(words[0].text, "Name");
        assert!((words[0].confidence - 0.965).abs() < 1e-4);
        assert_eq!(words[1].bounding_box, Some(BoundingBox { x: 120, y: 92, width: 70, height: 18 }));
    }

    #[test]
    fn tsv_negative_confidence_becomes_zero() {
        let words = parse_tsv_words(TSV);
        assert_eq!(words[2].text, "noise");
        assert_eq!(words[2].confidence, 0.0);
    }

    #[test]
    fn whitespace_normalisation() {
        assert_eq!(normalize_whitespace("a\nb\r\nc\t d"), "a b c d");
        assert_eq!(normalize_whitespace(" \n "), "");
    }

    #[test]
    fn explicit_tessdata_dir_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("eng.traineddata"), b"x").unwrap();
        assert_eq!(
            find_tessdata_dir(Some(dir.path()), "eng"),
            Some(dir.path().to_path_buf())
        );
    }
}
