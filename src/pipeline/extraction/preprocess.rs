//! Binary mask preparation for table structure analysis.
//!
//! The pipeline is: luminance → Gaussian smoothing → local adaptive
//! threshold → inversion, so that dark rule lines and glyphs become
//! foreground (255) on a background of 0. Everything here is pure Rust
//! over `image` buffers; no OpenCV or `imageproc` dependency.

use image::{DynamicImage, GrayImage, Luma, RgbImage};

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// Smoothing kernel size applied before thresholding (scan noise).
pub const BLUR_KERNEL_SIZE: usize = 5;

/// Neighbourhood used to compute the local threshold.
pub const ADAPTIVE_BLOCK_SIZE: usize = 11;

/// Offset subtracted from the local mean before comparing.
pub const ADAPTIVE_OFFSET: f32 = 2.0;

/// Mask value for foreground pixels.
pub const FOREGROUND: u8 = 255;

// ═══════════════════════════════════════════════════════════
// Mask construction
// ═══════════════════════════════════════════════════════════

/// Settings for [`to_binary_mask_with`].
#[derive(Debug, Clone, Copy)]
pub struct MaskSettings {
    pub blur_kernel: usize,
    pub block_size: usize,
    pub offset: f32,
}

impl Default for MaskSettings {
    fn default() -> Self {
        Self {
            blur_kernel: BLUR_KERNEL_SIZE,
            block_size: ADAPTIVE_BLOCK_SIZE,
            offset: ADAPTIVE_OFFSET,
        }
    }
}

/// Produce the inverted binary mask of `img` with default settings.
///
/// Never fails: a zero-sized image yields a zero-sized mask.
pub fn to_binary_mask(img: &DynamicImage) -> GrayImage {
    to_binary_mask_with(img, &MaskSettings::default())
}

pub fn to_binary_mask_with(img: &DynamicImage, settings: &MaskSettings) -> GrayImage {
    let gray = rgb_to_gray(&img.to_rgb8());
    if gray.width() == 0 || gray.height() == 0 {
        return GrayImage::new(gray.width(), gray.height());
    }

    let smoothed = gaussian_blur(&gray, settings.blur_kernel);
    adaptive_threshold_inverted(&smoothed, settings.block_size, settings.offset)
}

/// Convert RGB image to grayscale using ITU-R BT.601 luminance.
pub fn rgb_to_gray(rgb: &RgbImage) -> GrayImage {
    let (w, h) = (rgb.width(), rgb.height());
    let mut gray = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let p = rgb.get_pixel(x, y);
            let luma = (0.299 * p.0[0] as f32 + 0.587 * p.0[1] as f32 + 0.114 * p.0[2] as f32)
                .round()
                .clamp(0.0, 255.0) as u8;
            gray.put_pixel(x, y, Luma([luma]));
        }
    }
    gray
}

/// Normalised 1-D Gaussian kernel of odd size `ksize`.
///
/// Sigma is derived from the size the same way OpenCV does when sigma is
/// left at zero: `0.3 * ((ksize - 1) * 0.5 - 1) + 0.8`.
pub fn gaussian_kernel(ksize: usize) -> Vec<f32> {
    let ksize = ksize.max(1) | 1;
    let sigma = 0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let half = (ksize / 2) as f32;
    let denom = 2.0 * sigma * sigma;

    let mut kernel: Vec<f32> = (0..ksize)
        .map(|i| {
            let d = i as f32 - half;
            (-(d * d) / denom).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= sum;
    }
    kernel
}

/// Separable Gaussian blur with replicated borders, rounded back to u8.
pub fn gaussian_blur(img: &GrayImage, ksize: usize) -> GrayImage {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let src: Vec<f32> = img.as_raw().iter().map(|&v| v as f32).collect();
    let smoothed = separable_filter(&src, w, h, &gaussian_kernel(ksize));

    let pixels: Vec<u8> = smoothed
        .iter()
        .map(|v| v.round().clamp(0.0, 255.0) as u8)
        .collect();
    GrayImage::from_raw(w as u32, h as u32, pixels).unwrap_or_else(|| GrayImage::new(0, 0))
}

/// Inverted Gaussian-weighted adaptive threshold.
///
/// A pixel becomes foreground when it is not brighter than its local
/// weighted mean minus `offset`. Uniform regions, light or dark, stay
/// background because of the offset.
pub fn adaptive_threshold_inverted(img: &GrayImage, block_size: usize, offset: f32) -> GrayImage {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let src: Vec<f32> = img.as_raw().iter().map(|&v| v as f32).collect();
    let local_mean = separable_filter(&src, w, h, &gaussian_kernel(block_size));

    let pixels: Vec<u8> = src
        .iter()
        .zip(local_mean.iter())
        .map(|(&value, &mean)| if value <= mean - offset { FOREGROUND } else { 0 })
        .collect();
    GrayImage::from_raw(w as u32, h as u32, pixels).unwrap_or_else(|| GrayImage::new(0, 0))
}

/// Convolve rows then columns with `kernel`, clamping sample coordinates
/// to the image (replicated border).
fn separable_filter(src: &[f32], w: usize, h: usize, kernel: &[f32]) -> Vec<f32> {
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let half = (kernel.len() / 2) as isize;

    let mut horizontal = vec![0.0f32; w * h];
    for y in 0..h {
        let row = &src[y * w..(y + 1) * w];
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = (x as isize + k as isize - half).clamp(0, w as isize - 1) as usize;
                acc += row[sx] * weight;
            }
            horizontal[y * w + x] = acc;
        }
    }

    let mut out = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = (y as isize + k as isize - half).clamp(0, h as isize - 1) as usize;
                acc += horizontal[sy * w + x] * weight;
            }
            out[y * w + x] = acc;
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
