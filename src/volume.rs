use ndarray::Array3;

use crate::coords::Grid;
use crate::error::DecodeError;

/// A decoded scalar volume.
///
/// Samples are stored as `(z, y, x)` in standard layout, so the backing
/// buffer runs x fastest, then y, then z. Immutable once built; a reload
/// replaces the whole value.
#[derive(Debug, Clone)]
pub struct Volume {
    data: Array3<f32>,
    spacing: [f64; 3],
    min: f32,
    max: f32,
}

impl Volume {
    /// Build a volume from x-fastest samples.
    pub fn new(samples: Vec<f32>, dims: [usize; 3], spacing: [f64; 3]) -> Result<Self, DecodeError> {
        let expected = dims[0] * dims[1] * dims[2];
        if samples.len() != expected {
            return Err(DecodeError::Truncated {
                expected,
                found: samples.len(),
            });
        }
        let (min, max) = finite_range(&samples);
        let data = Array3::from_shape_vec((dims[2], dims[1], dims[0]), samples)
            .map_err(|e| DecodeError::Volume(e.to_string()))?;
        Ok(Self {
            data,
            spacing,
            min,
            max,
        })
    }

    /// `[nx, ny, nz]`
    pub fn dims(&self) -> [usize; 3] {
        let (nz, ny, nx) = self.data.dim();
        [nx, ny, nz]
    }

    /// Voxel spacing in mm, always positive.
    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    pub fn grid(&self) -> Grid {
        Grid::new(self.dims(), self.spacing)
    }

    /// Smallest and largest finite sample.
    pub fn value_range(&self) -> (f32, f32) {
        (self.min, self.max)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> f32 {
        self.data[[z, y, x]]
    }

    /// Samples in storage order (x fastest).
    pub fn samples(&self) -> impl ExactSizeIterator<Item = f32> + '_ {
        self.data.iter().copied()
    }
}

/// Min/max over finite samples; `(0, 0)` when there are none.
pub(crate) fn finite_range(samples: &[f32]) -> (f32, f32) {
    let (min, max) = samples
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if min > max {
        (0.0, 0.0)
    } else {
        (min, max)
    }
}
