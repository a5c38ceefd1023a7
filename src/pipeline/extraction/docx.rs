//! Word document reading: paragraph text via docx-rs, raster media via zip.

use std::io::{Cursor, Read};

use image::DynamicImage;
use tracing::debug;
use zip::ZipArchive;

use super::ExtractionError;

const MEDIA_PREFIX: &str = "word/media/";

/// Extracted body text and decodable media images, in part order.
pub struct DocxContent {
    pub text: String,
    pub media: Vec<DynamicImage>,
}

pub struct DocxExtractor;

impl DocxExtractor {
    pub fn extract(&self, bytes: &[u8]) -> Result<DocxContent, ExtractionError> {
        Ok(DocxContent {
            text: paragraph_text(bytes)?,
            media: media_images(bytes)?,
        })
    }
}

/// Paragraph text, one line per paragraph.
pub fn paragraph_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    let doc = docx_rs::read_docx(bytes).map_err(|e| ExtractionError::DocxParsing(e.to_string()))?;

    let mut text = String::new();
    for child in doc.document.children {
        if let docx_rs::DocumentChild::Paragraph(p) = child {
            for child in p.children {
                if let docx_rs::ParagraphChild::Run(run) = child {
                    for child in run.children {
                        if let docx_rs::RunChild::Text(t) = child {
                            text.push_str(&t.text);
                        }
                    }
                }
            }
            text.push('\n');
        }
    }
    Ok(text)
}

/// Raster parts under `word/media/`. Parts the `image` crate cannot
/// decode (EMF, WMF, SVG) are skipped.
pub fn media_images(bytes: &[u8]) -> Result<Vec<DynamicImage>, ExtractionError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractionError::DocxParsing(format!("Invalid package: {e}")))?;

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(MEDIA_PREFIX))
        .map(str::to_string)
        .collect();
    // image2 before image10
    names.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));

    let mut images = Vec::new();
    for name in names {
        let mut part = archive
            .by_name(&name)
            .map_err(|e| ExtractionError::DocxParsing(format!("{name}: {e}")))?;
        let mut data = Vec::new();
        part.read_to_end(&mut data)?;

        match image::load_from_memory(&data) {
            Ok(img) => images.push(img),
            Err(e) => debug!(part = %name, error = %e, "Skipping undecodable media part"),
        }
    }
    Ok(images)
}
