//! Voxel index ↔ millimetre conversion.

use std::fmt;

/// Per-axis tolerance when matching the 2mm template spacing.
const TEMPLATE_SPACING_TOLERANCE: f64 = 1e-3;
const TEMPLATE_DIMS: [usize; 3] = [91, 109, 91];
const TEMPLATE_SPACING: f64 = 2.0;
/// World coordinate (mm) of voxel (0,0,0) in the MNI152 2mm template.
const TEMPLATE_ORIGIN: [f64; 3] = [90.0, -126.0, -72.0];

/// One of the three volume axes, named by the slice it is normal to.
///
/// `X` is sagittal, `Y` coronal and `Z` axial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// Display sign of the generic mapping: the X index grows toward the
    /// subject's left, so right-positive mm needs a negation.
    fn sign(self) -> f64 {
        match self {
            Axis::X => -1.0,
            Axis::Y | Axis::Z => 1.0,
        }
    }

    pub fn view_name(self) -> &'static str {
        match self {
            Axis::X => "Sagittal",
            Axis::Y => "Coronal",
            Axis::Z => "Axial",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
            Axis::Z => write!(f, "Z"),
        }
    }
}

/// Active rendering grid: dimensions and physical voxel spacing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    pub dims: [usize; 3],
    pub spacing: [f64; 3],
}

impl Grid {
    pub fn new(dims: [usize; 3], spacing: [f64; 3]) -> Self {
        Self { dims, spacing }
    }

    pub fn dim(&self, axis: Axis) -> usize {
        self.dims[axis.index()]
    }

    /// Geometric centre, `floor(dim / 2)` on every axis.
    pub fn center(&self) -> [usize; 3] {
        [self.dims[0] / 2, self.dims[1] / 2, self.dims[2] / 2]
    }

    /// True for the standard 91×109×91 grid at 2mm isotropic spacing.
    pub fn is_mni_2mm(&self) -> bool {
        self.dims == TEMPLATE_DIMS
            && self
                .spacing
                .iter()
                .all(|s| (s - TEMPLATE_SPACING).abs() < TEMPLATE_SPACING_TOLERANCE)
    }

    pub fn index_to_mm(&self, axis: Axis, index: usize) -> f64 {
        let i = index as f64;
        if self.is_mni_2mm() {
            let origin = TEMPLATE_ORIGIN[axis.index()];
            return match axis {
                Axis::X => -TEMPLATE_SPACING * i + origin,
                Axis::Y | Axis::Z => TEMPLATE_SPACING * i + origin,
            };
        }
        let center = (self.dim(axis) / 2) as f64;
        axis.sign() * (i - center) * self.spacing[axis.index()]
    }

    /// Nearest voxel index for a millimetre coordinate, clamped to the grid.
    pub fn mm_to_index(&self, axis: Axis, mm: f64) -> usize {
        let v = if self.is_mni_2mm() {
            let origin = TEMPLATE_ORIGIN[axis.index()];
            match axis {
                Axis::X => (origin - mm) / TEMPLATE_SPACING,
                Axis::Y | Axis::Z => (mm - origin) / TEMPLATE_SPACING,
            }
        } else {
            let center = (self.dim(axis) / 2) as f64;
            axis.sign() * (mm / self.spacing[axis.index()]) + center
        };
        clamp_index(round_half_up(v), self.dim(axis))
    }

    pub fn indices_to_mm(&self, indices: [usize; 3]) -> [f64; 3] {
        Axis::ALL.map(|axis| self.index_to_mm(axis, indices[axis.index()]))
    }
}

/// Rounds to the nearest integer, ties toward positive infinity.
fn round_half_up(v: f64) -> f64 {
    (v + 0.5).floor()
}

fn clamp_index(v: f64, dim: usize) -> usize {
    if dim == 0 || v.is_nan() || v <= 0.0 {
        return 0;
    }
    let max = (dim - 1) as f64;
    v.min(max) as usize
}

/// User-facing text for a millimetre value: shortest exact form, no `-0`.
pub fn format_mm(mm: f64) -> String {
    let mm = mm + 0.0;
    format!("{mm}")
}
