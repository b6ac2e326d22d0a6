//! Slice extraction, overlay blending and presentation.
//!
//! A slice is sampled straight out of the volumes' backing arrays; nothing
//! here mutates state, so composing the same inputs twice gives the same
//! pixels.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use crate::config::DisplayConfig;
use crate::coords::{Axis, Grid};
use crate::volume::Volume;

/// Colour a passing overlay sample is blended toward.
pub const OVERLAY_COLOR: [u8; 3] = [255, 0, 0];
/// Crosshair colour.
pub const CROSSHAIR_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);

/// The volumes a slice is composed from. Either may be absent; a volume
/// whose dimensions differ from `grid` is ignored.
#[derive(Debug, Clone, Copy)]
pub struct Layers<'a> {
    pub grid: Grid,
    pub background: Option<&'a Volume>,
    pub overlay: Option<&'a Volume>,
}

/// A composited slice at native voxel resolution.
#[derive(Debug, Clone)]
pub struct SliceImage {
    pub axis: Axis,
    pub image: RgbaImage,
    /// Crosshair `(column, row)` in image pixels, row 0 at the top.
    pub crosshair: (u32, u32),
}

/// In-plane `(width, height)` of a slice normal to `axis`.
pub fn plane_size(axis: Axis, dims: [usize; 3]) -> (usize, usize) {
    let [nx, ny, nz] = dims;
    match axis {
        Axis::Z => (nx, ny),
        Axis::Y => (nx, nz),
        Axis::X => (ny, nz),
    }
}

/// Maps between in-plane pixel positions and voxel indices for one view.
#[derive(Debug, Clone, Copy)]
struct Plane {
    axis: Axis,
    dims: [usize; 3],
    mirror_x: bool,
}

impl Plane {
    fn flip_x(&self, v: usize) -> usize {
        if self.mirror_x {
            self.dims[0].saturating_sub(1).saturating_sub(v)
        } else {
            v
        }
    }

    /// Voxel sampled at column `col` and source row `src_row` (row 0 is
    /// the lowest index along the vertical axis).
    fn voxel(&self, index: usize, col: usize, src_row: usize) -> (usize, usize, usize) {
        match self.axis {
            Axis::Z => (self.flip_x(col), src_row, index),
            Axis::Y => (self.flip_x(col), index, src_row),
            Axis::X => (index, col, src_row),
        }
    }

    /// Column and source row of the cursor within this plane.
    fn cursor_position(&self, cursor: [usize; 3]) -> (usize, usize) {
        let [ix, iy, iz] = cursor;
        match self.axis {
            Axis::Z => (self.flip_x(ix), iy),
            Axis::Y => (self.flip_x(ix), iz),
            Axis::X => (iy, iz),
        }
    }

    fn in_plane_axes(&self) -> (Axis, Axis) {
        match self.axis {
            Axis::Z => (Axis::X, Axis::Y),
            Axis::Y => (Axis::X, Axis::Z),
            Axis::X => (Axis::Y, Axis::Z),
        }
    }
}

/// Voxel indices addressed by an image pixel `(col, row)` of the view
/// normal to `axis`, for the two in-plane axes. Out-of-range pixels clamp
/// to the image edge.
pub fn pixel_to_indices(
    axis: Axis,
    dims: [usize; 3],
    mirror_x: bool,
    col: u32,
    row: u32,
) -> [(Axis, usize); 2] {
    let plane = Plane { axis, dims, mirror_x };
    let (w, h) = plane_size(axis, dims);
    let col = (col as usize).min(w.saturating_sub(1));
    let row = (row as usize).min(h.saturating_sub(1));
    let src_row = h.saturating_sub(1) - row;
    let (horizontal, vertical) = plane.in_plane_axes();
    let col_index = if horizontal == Axis::X {
        plane.flip_x(col)
    } else {
        col
    };
    [(horizontal, col_index), (vertical, src_row)]
}

/// Whether an overlay sample is drawn.
///
/// With `use_abs` the threshold test sees `|raw|`, but the positive-only
/// test always sees `raw`.
pub fn overlay_passes(raw: f32, threshold: Option<f32>, display: &DisplayConfig) -> bool {
    let v = if display.use_abs { raw.abs() } else { raw };
    let pass = match threshold {
        Some(t) => v >= t,
        None => v > 0.0,
    };
    pass && !(display.positive_only && raw <= 0.0)
}

fn gray_level(v: f32, min: f32, range: f32) -> u8 {
    let g = ((v - min) / range).clamp(0.0, 1.0);
    (g * 255.0) as u8
}

fn blend(base: u8, target: u8, alpha: f32) -> u8 {
    ((1.0 - alpha) * base as f32 + alpha * target as f32) as u8
}

/// Compose the slice normal to `axis` at `cursor[axis]`.
///
/// Returns `None` when there is nothing to draw (empty grid or an index
/// outside it).
pub fn compose_slice(
    layers: &Layers<'_>,
    axis: Axis,
    cursor: [usize; 3],
    display: &DisplayConfig,
    threshold: Option<f32>,
) -> Option<SliceImage> {
    let dims = layers.grid.dims;
    if dims.contains(&0) {
        return None;
    }
    let index = cursor[axis.index()];
    if index >= dims[axis.index()] {
        return None;
    }
    let (w, h) = plane_size(axis, dims);
    let plane = Plane {
        axis,
        dims,
        mirror_x: display.mirror_x,
    };

    let background = layers.background.filter(|v| v.dims() == dims);
    let overlay = layers.overlay.filter(|v| v.dims() == dims);

    let (bg_min, bg_max) = background.map_or((0.0, 1.0), Volume::value_range);
    let bg_range = if bg_max - bg_min > 0.0 {
        bg_max - bg_min
    } else {
        1.0
    };
    let alpha = if display.alpha.is_nan() {
        0.0
    } else {
        display.alpha.clamp(0.0, 1.0)
    };

    let mut image = RgbaImage::new(w as u32, h as u32);
    for row in 0..h {
        // Row 0 shows the highest index so superior/anterior is up.
        let src_row = h - 1 - row;
        for col in 0..w {
            let (x, y, z) = plane.voxel(index, col, src_row);
            let gray = background.map_or(0, |bg| gray_level(bg.get(x, y, z), bg_min, bg_range));
            let mut px = [gray, gray, gray, 255];
            if let Some(ov) = overlay {
                if overlay_passes(ov.get(x, y, z), threshold, display) {
                    for (c, target) in px.iter_mut().zip(OVERLAY_COLOR) {
                        *c = blend(*c, target, alpha);
                    }
                }
            }
            image.put_pixel(col as u32, row as u32, Rgba(px));
        }
    }

    let (cross_col, cross_src_row) = plane.cursor_position(cursor);
    let cross_col = cross_col.min(w - 1);
    let cross_row = h - 1 - cross_src_row.min(h - 1);

    Some(SliceImage {
        axis,
        image,
        crosshair: (cross_col as u32, cross_row as u32),
    })
}

/// Placement of a slice on a square presentation surface: uniformly
/// scaled to fit and centred.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Presentation {
    /// Surface side in device pixels.
    pub side: u32,
    pub scale: f64,
    pub offset: [f64; 2],
    pub size: [f64; 2],
    pub line_width: u32,
    image: [u32; 2],
}

impl Presentation {
    /// Fit a `width`×`height` image into a square of `base_side` logical
    /// pixels at device pixel ratio `dpr`.
    pub fn fit(width: u32, height: u32, base_side: f64, dpr: f64) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let dpr = if dpr.is_finite() && dpr > 0.0 { dpr } else { 1.0 };
        let base = if base_side.is_finite() && base_side > 0.0 {
            base_side
        } else {
            width.max(height) as f64
        };
        let side = (base * dpr).round().max(1.0);
        let scale = (side / width as f64).min(side / height as f64);
        let size = [width as f64 * scale, height as f64 * scale];
        Some(Self {
            side: side as u32,
            scale,
            offset: [(side - size[0]) / 2.0, (side - size[1]) / 2.0],
            size,
            line_width: dpr.round().max(1.0) as u32,
            image: [width, height],
        })
    }

    /// Surface position of crosshair lines through image pixel `(col, row)`.
    /// The first and last pixel map onto the edges of the drawn area.
    pub fn crosshair_at(&self, col: u32, row: u32) -> [f64; 2] {
        let denom_x = self.image[0].saturating_sub(1).max(1) as f64;
        let denom_y = self.image[1].saturating_sub(1).max(1) as f64;
        [
            self.offset[0] + (col as f64 / denom_x) * self.size[0],
            self.offset[1] + (row as f64 / denom_y) * self.size[1],
        ]
    }

    /// Image pixel under surface position `(sx, sy)`, or `None` outside
    /// the drawn area.
    pub fn surface_to_image(&self, sx: f64, sy: f64) -> Option<(u32, u32)> {
        let ux = sx - self.offset[0];
        let uy = sy - self.offset[1];
        if !(0.0..self.size[0]).contains(&ux) || !(0.0..self.size[1]).contains(&uy) {
            return None;
        }
        let col = ((ux / self.scale).floor() as u32).min(self.image[0] - 1);
        let row = ((uy / self.scale).floor() as u32).min(self.image[1] - 1);
        Some((col, row))
    }
}

/// Draw `slice` onto a square surface of `base_side` logical pixels at
/// device pixel ratio `dpr`, then the crosshair on top.
pub fn present(slice: &SliceImage, base_side: f64, dpr: f64) -> Option<RgbaImage> {
    let (w, h) = slice.image.dimensions();
    let p = Presentation::fit(w, h, base_side, dpr)?;
    let mut surface = RgbaImage::new(p.side, p.side);

    let draw_w = p.size[0].round().max(1.0) as u32;
    let draw_h = p.size[1].round().max(1.0) as u32;
    let scaled = imageops::resize(&slice.image, draw_w, draw_h, FilterType::Triangle);
    let left = p.offset[0].round() as i64;
    let top = p.offset[1].round() as i64;
    imageops::overlay(&mut surface, &scaled, left, top);

    let [cx, cy] = p.crosshair_at(slice.crosshair.0, slice.crosshair.1);
    let line = p.line_width as i64;
    // Keep the last column/row line inside the drawn area.
    let cx = (cx.floor() as i64).clamp(left, (left + draw_w as i64 - line).max(left));
    let cy = (cy.floor() as i64).clamp(top, (top + draw_h as i64 - line).max(top));
    let side = p.side as i64;
    let mut put = |x: i64, y: i64| {
        if (0..side).contains(&x) && (0..side).contains(&y) {
            surface.put_pixel(x as u32, y as u32, CROSSHAIR_COLOR);
        }
    };
    for y in top..top + draw_h as i64 {
        for x in cx..cx + line {
            put(x, y);
        }
    }
    for x in left..left + draw_w as i64 {
        for y in cy..cy + line {
            put(x, y);
        }
    }
    Some(surface)
}
