//! Ruled-table grid detection on a binary mask.
//!
//! Horizontal and vertical rules are isolated separately with a line-shaped
//! morphological opening, re-joined by dilation, then reduced to connected
//! components. Components spanning more than half the image become boundary
//! positions; consecutive positions delimit the rows and columns of the grid.

use image::{GrayImage, Luma};
use tracing::debug;

use super::preprocess::FOREGROUND;
use super::types::{CellBoundingBox, CellGrid};

/// Length of the line-shaped structuring element.
const LINE_KERNEL_LEN: u32 = 40;

/// Erode/dilate passes of the opening.
const OPEN_ITERATIONS: u32 = 2;

/// Extra dilation passes that reconnect broken rules.
const RECONNECT_ITERATIONS: u32 = 3;

/// A rule must span more than this share of the image dimension.
const MIN_RULE_SPAN_RATIO: f32 = 0.5;

/// Positions this close to an image edge snap onto it.
const EDGE_SNAP_PX: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MorphOp {
    Erode,
    Dilate,
}

/// Tunables of the grid detector.
#[derive(Debug, Clone, Copy)]
pub struct GridSettings {
    pub kernel_len: u32,
    pub open_iterations: u32,
    pub reconnect_iterations: u32,
    pub min_span_ratio: f32,
    pub edge_snap_px: u32,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            kernel_len: LINE_KERNEL_LEN,
            open_iterations: OPEN_ITERATIONS,
            reconnect_iterations: RECONNECT_ITERATIONS,
            min_span_ratio: MIN_RULE_SPAN_RATIO,
            edge_snap_px: EDGE_SNAP_PX,
        }
    }
}

/// Finds the cell grid of a ruled table in a binary mask.
#[derive(Debug, Clone, Default)]
pub struct TableStructureDetector {
    settings: GridSettings,
}

impl TableStructureDetector {
    pub fn new(settings: GridSettings) -> Self {
        Self { settings }
    }

    /// Returns an empty grid when fewer than two boundaries exist in
    /// either direction.
    pub fn detect(&self, mask: &GrayImage) -> CellGrid {
        let (width, height) = mask.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let rows = self.boundaries(mask, Orientation::Horizontal);
        let cols = self.boundaries(mask, Orientation::Vertical);

        debug!(
            width,
            height,
            row_boundaries = rows.len(),
            col_boundaries = cols.len(),
            "Table grid boundaries"
        );

        build_grid(&rows, &cols)
    }

    /// Sorted, deduplicated, edge-snapped boundary positions for one direction.
    pub fn boundaries(&self, mask: &GrayImage, orientation: Orientation) -> Vec<u32> {
        let s = &self.settings;
        let rules = isolate_rules(mask, orientation, s);
        let (width, height) = mask.dimensions();

        let extent = match orientation {
            Orientation::Horizontal => height,
            Orientation::Vertical => width,
        };
        let positions = rule_positions(
            &connected_components(&rules),
            orientation,
            (width, height),
            s.min_span_ratio,
        );
        snap_to_edges(positions, extent, s.edge_snap_px)
    }
}

/// Directional opening followed by reconnecting dilation.
pub fn isolate_rules(mask: &GrayImage, orientation: Orientation, s: &GridSettings) -> GrayImage {
    let mut out = mask.clone();
    for _ in 0..s.open_iterations {
        out = line_morph(&out, orientation, s.kernel_len, MorphOp::Erode);
    }
    for _ in 0..s.open_iterations + s.reconnect_iterations {
        out = line_morph(&out, orientation, s.kernel_len, MorphOp::Dilate);
    }
    out
}

/// One erosion or dilation with a 1-pixel-thick line of `kernel_len`.
///
/// Windows are clipped at the image border, so the outside of the image
/// neither erodes nor dilates anything.
fn line_morph(mask: &GrayImage, orientation: Orientation, kernel_len: u32, op: MorphOp) -> GrayImage {
    let (width, height) = mask.dimensions();
    let mut out = GrayImage::new(width, height);

    let k = kernel_len.max(1) as i64;
    let anchor = k / 2;
    let (before, after) = match op {
        MorphOp::Erode => (anchor, k - 1 - anchor),
        MorphOp::Dilate => (k - 1 - anchor, anchor),
    };

    let (lines, len) = match orientation {
        Orientation::Horizontal => (height, width),
        Orientation::Vertical => (width, height),
    };
    let at = |line: u32, i: u32| match orientation {
        Orientation::Horizontal => (i, line),
        Orientation::Vertical => (line, i),
    };

    let mut prefix = vec![0u32; len as usize + 1];
    for line in 0..lines {
        for i in 0..len {
            let (x, y) = at(line, i);
            let on = (mask.get_pixel(x, y).0[0] > 0) as u32;
            prefix[i as usize + 1] = prefix[i as usize] + on;
        }

        for i in 0..len {
            let lo = (i as i64 - before).max(0) as usize;
            let hi = (i as i64 + after).min(len as i64 - 1) as usize;
            let on = prefix[hi + 1] - prefix[lo];
            let keep = match op {
                MorphOp::Erode => on as usize == hi + 1 - lo,
                MorphOp::Dilate => on > 0,
            };
            if keep {
                let (x, y) = at(line, i);
                out.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
    }
    out
}

/// Bounding boxes of 8-connected foreground components.
pub fn connected_components(mask: &GrayImage) -> Vec<CellBoundingBox> {
    let (width, height) = mask.dimensions();
    let (w, h) = (width as usize, height as usize);
    let mut seen = vec![false; w * h];
    let mut boxes = Vec::new();
    let mut stack = Vec::new();

    for start in 0..w * h {
        if seen[start] || mask.as_raw()[start] == 0 {
            continue;
        }
        seen[start] = true;
        stack.push(start);

        let (mut min_x, mut min_y) = (start % w, start / w);
        let (mut max_x, mut max_y) = (min_x, min_y);

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);

            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let n = ny * w + nx;
                    if !seen[n] && mask.as_raw()[n] != 0 {
                        seen[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        boxes.push(CellBoundingBox {
            x: min_x as u32,
            y: min_y as u32,
            width: (max_x - min_x + 1) as u32,
            height: (max_y - min_y + 1) as u32,
        });
    }
    boxes
}

/// Midpoints of components long enough to be rules, sorted and deduplicated.
pub fn rule_positions(
    components: &[CellBoundingBox],
    orientation: Orientation,
    (width, height): (u32, u32),
    min_span_ratio: f32,
) -> Vec<u32> {
    let mut positions: Vec<u32> = components
        .iter()
        .filter_map(|b| match orientation {
            Orientation::Horizontal if b.width as f32 > min_span_ratio * width as f32 => {
                Some(b.y + b.height / 2)
            }
            Orientation::Vertical if b.height as f32 > min_span_ratio * height as f32 => {
                Some(b.x + b.width / 2)
            }
            _ => None,
        })
        .collect();
    positions.sort_unstable();
    positions.dedup();
    positions
}

/// Snap positions within `margin` of an edge onto it, and add the edge
/// itself when the outermost rule stops short of it.
pub fn snap_to_edges(positions: Vec<u32>, extent: u32, margin: u32) -> Vec<u32> {
    let far = extent.saturating_sub(margin);
    let mut snapped: Vec<u32> = positions
        .into_iter()
        .map(|p| {
            if p <= margin {
                0
            } else if p >= far {
                extent
            } else {
                p
            }
        })
        .collect();

    if snapped.first().map_or(true, |&p| p > margin) {
        snapped.insert(0, 0);
    }
    if snapped.last().map_or(true, |&p| p < far) {
        snapped.push(extent);
    }
    snapped.dedup();
    snapped
}

/// Cell `[i][j]` spans rows `i..i+1` and columns `j..j+1` of the boundaries.
pub fn build_grid(rows: &[u32], cols: &[u32]) -> CellGrid {
    if rows.len() < 2 || cols.len() < 2 {
        return Vec::new();
    }
    rows.windows(2)
        .map(|r| {
            cols.windows(2)
                .map(|c| CellBoundingBox {
                    x: c[0],
                    y: r[0],
                    width: c[1] - c[0],
                    height: r[1] - r[0],
                })
                .collect()
        })
        .collect()
}
