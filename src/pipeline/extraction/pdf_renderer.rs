//! Embedded raster extraction from PDF pages using lopdf.
//!
//! Walks each page's `/Resources /XObject` dictionary and decodes every
//! `/Subtype /Image` stream: JPEG (`DCTDecode`) streams are decoded as-is,
//! other streams are tried as encoded image files first and then rebuilt
//! from raw samples using `/Width`, `/Height` and `/ColorSpace`.

use image::{DynamicImage, GrayImage, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, warn};

use super::ExtractionError;

/// Parent hops followed when looking for inherited page resources.
const MAX_RESOURCE_DEPTH: usize = 8;

/// A decoded image XObject and its 1-based position among the page's images.
pub struct EmbeddedImage {
    pub ordinal: usize,
    pub image: DynamicImage,
}

/// Extracts embedded images from PDF pages using lopdf.
pub struct LopdfImageExtractor;

impl LopdfImageExtractor {
    /// Decode every usable image on `page_id`.
    ///
    /// Images whose colour resolves to something other than gray or RGB are
    /// skipped, as are images that fail to decode; neither aborts the page.
    pub fn page_images(&self, doc: &Document, page_id: ObjectId, page_number: usize) -> Vec<EmbeddedImage> {
        let Some(xobjects) = page_xobjects(doc, page_id) else {
            return Vec::new();
        };

        let image_streams = xobjects.iter().filter_map(|(name, entry)| {
            let stream = deref(doc, entry).as_stream().ok()?;
            is_name(stream.dict.get(b"Subtype").ok()?, b"Image").then_some((name, stream))
        });

        let mut images = Vec::new();
        for (index, (name, stream)) in image_streams.enumerate() {
            let name = String::from_utf8_lossy(name);
            let xobject = ImageXObject::describe(doc, stream);

            if !matches!(xobject.channels(), 1 | 3) {
                debug!(
                    page = page_number,
                    image = %name,
                    channels = xobject.channels(),
                    "Skipping image with unsupported colour space"
                );
                continue;
            }

            match xobject.decode(stream) {
                Ok(image) => images.push(EmbeddedImage {
                    ordinal: index + 1,
                    image,
                }),
                Err(e) => warn!(page = page_number, image = %name, error = %e, "Failed to decode embedded image"),
            }
        }
        images
    }
}

/// How stored samples map to colour.
#[derive(Debug, Clone, PartialEq)]
enum ColourSpace {
    /// `n` components per pixel, used directly. Zero when unusable.
    Device(u8),
    /// One palette index per pixel, looked up in `base`-component entries.
    Indexed { base: u8, hival: u8, lookup: Vec<u8> },
}

/// What the stream dictionary says about an image's encoding.
struct ImageXObject {
    jpeg: bool,
    bits: u8,
    space: ColourSpace,
}

impl ImageXObject {
    fn describe(doc: &Document, stream: &Stream) -> Self {
        let filters = match stream.dict.get(b"Filter") {
            Ok(Object::Array(items)) => items.iter().collect(),
            Ok(single) => vec![single],
            Err(_) => Vec::new(),
        };
        let mask = stream
            .dict
            .get(b"ImageMask")
            .map(|v| matches!(v, Object::Boolean(true)))
            .unwrap_or(false);

        // Stencil masks are always one bit, one channel.
        let (bits, space) = if mask {
            (1, ColourSpace::Device(1))
        } else {
            let bits = stream
                .dict
                .get(b"BitsPerComponent")
                .and_then(Object::as_i64)
                .ok()
                .and_then(|b| u8::try_from(b).ok())
                .unwrap_or(8);
            let space = match stream.dict.get(b"ColorSpace") {
                Ok(obj) => parse_colour_space(doc, obj, 0),
                Err(_) => ColourSpace::Device(3),
            };
            (bits, space)
        };

        Self {
            jpeg: filters.iter().any(|f| is_name(f, b"DCTDecode")),
            bits,
            space,
        }
    }

    /// Channels of the decoded raster.
    fn channels(&self) -> u8 {
        match &self.space {
            ColourSpace::Device(n) => *n,
            ColourSpace::Indexed { base, .. } => *base,
        }
    }

    fn decode(&self, stream: &Stream) -> Result<DynamicImage, ExtractionError> {
        if self.jpeg {
            // The stream body is a complete JPEG file.
            return image::load_from_memory(&stream.content)
                .map_err(|e| ExtractionError::ImageProcessing(format!("JPEG image stream: {e}")));
        }

        let body = match stream.decompressed_content() {
            Ok(bytes) => bytes,
            Err(_) => stream.content.clone(),
        };
        // Encoders occasionally embed whole PNG or TIFF files.
        match image::load_from_memory(&body) {
            Ok(img) => Ok(img),
            Err(_) => self.from_samples(&stream.dict, &body),
        }
    }

    /// Rebuild an 8-bit-per-channel raster from raw samples.
    fn from_samples(&self, dict: &Dictionary, body: &[u8]) -> Result<DynamicImage, ExtractionError> {
        let width = dimension(dict, b"Width")?;
        let height = dimension(dict, b"Height")?;

        let pixels = match &self.space {
            ColourSpace::Device(n) => unpack_samples(body, width, height, *n, self.bits, true)?,
            ColourSpace::Indexed { base, hival, lookup } => {
                let indices = unpack_samples(body, width, height, 1, self.bits, false)?;
                expand_palette(&indices, *base, *hival, lookup)
            }
        };

        let image = if self.channels() == 1 {
            GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8)
        } else {
            RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
        };
        image.ok_or_else(|| ExtractionError::ImageProcessing("sample buffer does not fit image size".into()))
    }
}

/// Resolve `/ColorSpace`. Unknown names default to RGB; an indexed space
/// whose base or lookup table cannot be read becomes `Device(0)`.
fn parse_colour_space(doc: &Document, obj: &Object, depth: usize) -> ColourSpace {
    match deref(doc, obj) {
        Object::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => ColourSpace::Device(1),
            b"DeviceCMYK" | b"CMYK" => ColourSpace::Device(4),
            _ => ColourSpace::Device(3),
        },
        Object::Array(parts) => {
            let family = parts.first().and_then(|o| o.as_name().ok()).unwrap_or_default();
            match family {
                b"Indexed" | b"I" if depth == 0 => parse_indexed(doc, parts),
                b"Indexed" | b"I" => ColourSpace::Device(0),
                b"CalGray" => ColourSpace::Device(1),
                b"ICCBased" => parts
                    .get(1)
                    .and_then(|profile| deref(doc, profile).as_stream().ok())
                    .and_then(|profile| profile.dict.get(b"N").and_then(Object::as_i64).ok())
                    .and_then(|n| u8::try_from(n).ok())
                    .map(ColourSpace::Device)
                    .unwrap_or(ColourSpace::Device(3)),
                _ => ColourSpace::Device(3),
            }
        }
        _ => ColourSpace::Device(3),
    }
}

/// `[/Indexed base hival lookup]`, where lookup is a string or a stream.
fn parse_indexed(doc: &Document, parts: &[Object]) -> ColourSpace {
    let base = match parts.get(1).map(|b| parse_colour_space(doc, b, 1)) {
        Some(ColourSpace::Device(n @ (1 | 3))) => n,
        _ => return ColourSpace::Device(0),
    };
    let Some(hival) = parts
        .get(2)
        .and_then(|h| deref(doc, h).as_i64().ok())
        .and_then(|h| u8::try_from(h).ok())
    else {
        return ColourSpace::Device(0);
    };
    let lookup = match parts.get(3).map(|l| deref(doc, l)) {
        Some(Object::String(bytes, _)) => bytes.clone(),
        Some(Object::Stream(stream)) => stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone()),
        _ => return ColourSpace::Device(0),
    };
    ColourSpace::Indexed { base, hival, lookup }
}

/// Unpack `bits`-deep samples into one byte each. Rows start on byte
/// boundaries. With `scale`, values are stretched to 0..=255; without it
/// they are kept as palette indices.
fn unpack_samples(
    data: &[u8],
    width: u32,
    height: u32,
    components: u8,
    bits: u8,
    scale: bool,
) -> Result<Vec<u8>, ExtractionError> {
    if !matches!(bits, 1 | 2 | 4 | 8 | 16) {
        return Err(ExtractionError::ImageProcessing(format!(
            "{bits} bits per component not supported"
        )));
    }
    let per_row = width as usize * components as usize;
    let row_bytes = (per_row * bits as usize).div_ceil(8);
    let needed = row_bytes * height as usize;
    if row_bytes == 0 || data.len() < needed {
        return Err(ExtractionError::ImageProcessing(format!(
            "{width}x{height} image needs {needed} sample bytes, stream has {}",
            data.len()
        )));
    }

    let max = (1u32 << bits) - 1;
    let mut out = Vec::with_capacity(per_row * height as usize);
    for row in data[..needed].chunks_exact(row_bytes) {
        for i in 0..per_row {
            let value = match bits {
                8 => u32::from(row[i]),
                16 => u32::from(u16::from_be_bytes([row[2 * i], row[2 * i + 1]])),
                _ => {
                    let bit = i * bits as usize;
                    let shift = 8 - bits as usize - bit % 8;
                    u32::from(row[bit / 8] >> shift) & max
                }
            };
            let sample = if scale { value * 255 / max } else { value.min(255) };
            out.push(sample as u8);
        }
    }
    Ok(out)
}

/// Replace palette indices with their `base`-component entries. Indices
/// past `hival` or past the end of the table map to black.
fn expand_palette(indices: &[u8], base: u8, hival: u8, lookup: &[u8]) -> Vec<u8> {
    let base = base as usize;
    let mut out = Vec::with_capacity(indices.len() * base);
    for &index in indices {
        let start = index as usize * base;
        match lookup.get(start..start + base) {
            Some(entry) if index <= hival => out.extend_from_slice(entry),
            _ => out.extend(std::iter::repeat(0).take(base)),
        }
    }
    out
}

/// The page's `/XObject` dictionary, following inherited `/Resources`.
fn page_xobjects(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_RESOURCE_DEPTH {
        if let Some(resources) = dict_entry(doc, node, b"Resources") {
            return dict_entry(doc, resources, b"XObject");
        }
        node = dict_entry(doc, node, b"Parent")?;
    }
    None
}

fn deref<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn dict_entry<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    deref(doc, dict.get(key).ok()?).as_dict().ok()
}

fn is_name(obj: &Object, expected: &[u8]) -> bool {
    matches!(obj, Object::Name(n) if n.as_slice() == expected)
}

fn dimension(dict: &Dictionary, key: &[u8]) -> Result<u32, ExtractionError> {
    dict.get(key)
        .and_then(Object::as_i64)
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| {
            ExtractionError::PdfParsing(format!(
                "image /{} missing or invalid",
                String::from_utf8_lossy(key)
            ))
        })
}

// ── Tests ────────────────────────────────────────────────────────────────
