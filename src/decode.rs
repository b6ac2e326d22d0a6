//! NIfTI-1 decoding into a [`Volume`].

use std::io::{self, Cursor, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::{Axis as NdAxis, Ix3};
use nifti::{Endianness, InMemNiftiVolume, IntoNdArray, NiftiHeader, NiftiType, NiftiVolume};

use crate::coords::Axis;
use crate::error::DecodeError;
use crate::volume::{finite_range, Volume};

const HEADER_SIZE: usize = 348;

/// True when the buffer starts with the gzip magic bytes.
pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Decode a `.nii` or `.nii.gz` byte buffer. Compression is sniffed from
/// the content, not from any file name.
pub fn decode_volume(bytes: &[u8]) -> Result<Volume, DecodeError> {
    let cursor = Cursor::new(bytes);
    if is_gzip(bytes) {
        decode_reader(GzDecoder::new(cursor))
    } else {
        decode_reader(cursor)
    }
}

/// Read a volume from a local file.
pub fn load_volume_file(path: impl AsRef<Path>) -> Result<Volume, DecodeError> {
    let bytes = std::fs::read(path)?;
    decode_volume(&bytes)
}

/// Decode an uncompressed single-file NIfTI-1 stream.
pub fn decode_reader<R: Read>(mut reader: R) -> Result<Volume, DecodeError> {
    let header = NiftiHeader::from_reader(&mut reader)?;
    let dims = spatial_dims(&header)?;
    let spacing = spatial_spacing(&header);

    let skip = data_gap(header.vox_offset)?;
    if skip > 0 {
        let copied = io::copy(&mut (&mut reader).take(skip), &mut io::sink())?;
        if copied < skip {
            return Err(DecodeError::Truncated {
                expected: skip as usize,
                found: copied as usize,
            });
        }
    }

    // Buffer what is actually there before trusting the header's extents.
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    let needed = voxel_bytes(&header)?;
    if (data.len() as u64) < needed {
        return Err(DecodeError::Truncated {
            expected: usize::try_from(needed).unwrap_or(usize::MAX),
            found: data.len(),
        });
    }

    let volume = InMemNiftiVolume::from_reader(Cursor::new(data), &header)
        .map_err(|e| DecodeError::Volume(e.to_string()))?;
    let mut samples = normalized_samples(volume, header.endianness, dims)?;

    let expected = dims[0] * dims[1] * dims[2];
    if samples.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            found: samples.len(),
        });
    }
    // Higher dimensions beyond the first 3D volume are dropped.
    samples.truncate(expected);
    Volume::new(samples, dims, spacing)
}

/// Bytes between the end of the header and the voxel data.
fn data_gap(vox_offset: f32) -> Result<u64, DecodeError> {
    if !vox_offset.is_finite() || vox_offset < 0.0 {
        return Err(DecodeError::BadVoxOffset(vox_offset));
    }
    Ok((vox_offset as u64).saturating_sub(HEADER_SIZE as u64))
}

/// Size of the voxel buffer the header declares, across all dimensions.
fn voxel_bytes(header: &NiftiHeader) -> Result<u64, DecodeError> {
    let ndim = usize::from(header.dim[0]).min(7);
    let voxels = header.dim[1..=ndim]
        .iter()
        .fold(1u64, |acc, &d| acc.saturating_mul(u64::from(d)));
    let element = header.data_type()?.size_of() as u64;
    Ok(voxels.saturating_mul(element))
}

fn spatial_dims(header: &NiftiHeader) -> Result<[usize; 3], DecodeError> {
    let dim0 = header.dim[0];
    if dim0 == 0 {
        return Err(DecodeError::MissingDimensions { dim0 });
    }
    let dims = [
        header.dim[1] as usize,
        header.dim[2] as usize,
        header.dim[3] as usize,
    ];
    for axis in Axis::ALL {
        if dims[axis.index()] == 0 {
            return Err(DecodeError::ZeroDimension { axis });
        }
    }
    Ok(dims)
}

/// Absolute pixdim, so flipped-axis sign conventions still give a
/// positive spacing.
fn spatial_spacing(header: &NiftiHeader) -> [f64; 3] {
    [1, 2, 3].map(|i| {
        let s = (header.pixdim[i] as f64).abs();
        if s.is_finite() && s > 0.0 {
            s
        } else {
            1.0
        }
    })
}

/// Convert the element buffer to f32, x fastest.
///
/// Float data passes through as stored; every integer type is linearly rescaled to
/// `[0, 1]` over its own range; anything else is reinterpreted as f32.
fn normalized_samples(
    volume: InMemNiftiVolume,
    endianness: Endianness,
    dims: [usize; 3],
) -> Result<Vec<f32>, DecodeError> {
    match volume.data_type() {
        // Raw element values; no scl_slope/scl_inter for float data.
        NiftiType::Float32 => Ok(reinterpret_f32(volume.raw_data(), endianness)),
        NiftiType::Float64 => Ok(reinterpret_f64(volume.raw_data(), endianness)),
        NiftiType::Uint8
        | NiftiType::Int8
        | NiftiType::Uint16
        | NiftiType::Int16
        | NiftiType::Uint32
        | NiftiType::Int32
        | NiftiType::Uint64
        | NiftiType::Int64 => {
            let array = volume
                .into_ndarray::<f32>()
                .map_err(|e| DecodeError::Volume(e.to_string()))?;
            let samples = first_volume_x_fastest(array, dims)?;
            Ok(rescale_unit(samples))
        }
        other => {
            log::warn!("unsupported NIfTI element type {other:?}, reading raw bytes as f32");
            Ok(reinterpret_f32(volume.raw_data(), endianness))
        }
    }
}

fn first_volume_x_fastest(
    mut array: ndarray::ArrayD<f32>,
    dims: [usize; 3],
) -> Result<Vec<f32>, DecodeError> {
    while array.ndim() > 3 {
        let last = array.ndim() - 1;
        array = array.index_axis_move(NdAxis(last), 0);
    }
    while array.ndim() < 3 {
        array.insert_axis_inplace(NdAxis(array.ndim()));
    }
    let xyz = array
        .into_dimensionality::<Ix3>()
        .map_err(|e| DecodeError::Volume(e.to_string()))?;
    let found = xyz.len();
    let expected = dims[0] * dims[1] * dims[2];
    if found != expected {
        return Err(DecodeError::Truncated { expected, found });
    }
    // (x, y, z) reversed to (z, y, x) walks memory x fastest.
    Ok(xyz.reversed_axes().iter().copied().collect())
}

fn rescale_unit(mut samples: Vec<f32>) -> Vec<f32> {
    let (min, max) = finite_range(&samples);
    let range = if max - min > 0.0 { max - min } else { 1.0 };
    for v in samples.iter_mut() {
        *v = (*v - min) / range;
    }
    samples
}

fn reinterpret_f32(raw: &[u8], endianness: Endianness) -> Vec<f32> {
    raw.chunks_exact(4)
        .map(|c| {
            let bytes = [c[0], c[1], c[2], c[3]];
            match endianness {
                Endianness::Little => f32::from_le_bytes(bytes),
                Endianness::Big => f32::from_be_bytes(bytes),
            }
        })
        .collect()
}

fn reinterpret_f64(raw: &[u8], endianness: Endianness) -> Vec<f32> {
    raw.chunks_exact(8)
        .map(|c| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(c);
            let v = match endianness {
                Endianness::Little => f64::from_le_bytes(bytes),
                Endianness::Big => f64::from_be_bytes(bytes),
            };
            v as f32
        })
        .collect()
}
