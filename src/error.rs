//! Error taxonomy for the viewer.
//!
//! None of these are fatal: a failed load leaves its slot empty with a
//! status message, and an unparsable coordinate edit is simply not applied.

use crate::coords::Axis;

/// A volumetric file could not be turned into a [`crate::Volume`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("not a NIfTI file: {0}")]
    NotNifti(#[from] nifti::NiftiError),

    #[error("invalid dims: header declares {dim0} dimension(s)")]
    MissingDimensions { dim0: u16 },

    #[error("invalid dims: {axis} extent is zero")]
    ZeroDimension { axis: Axis },

    #[error("invalid vox_offset {0}")]
    BadVoxOffset(f32),

    #[error("data truncated: {found} of {expected} expected")]
    Truncated { expected: usize, found: usize },

    #[error("failed to read voxel data: {0}")]
    Volume(String),

    #[error("failed to decompress: {0}")]
    Io(#[from] std::io::Error),
}

/// A fetch failed or returned a non-success status.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("HTTP client unavailable: {0}")]
    Client(String),

    #[error("GET {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("GET {url} → {status} {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("cannot read {path}: {message}")]
    File { path: String, message: String },
}

/// Coordinate text that cannot (yet) be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("coordinate is still being typed")]
    Incomplete,

    #[error("'{0}' is not a coordinate")]
    NotANumber(String),

    #[error("no volume loaded")]
    NoGrid,
}

/// Why a slot ended up empty after a load.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
