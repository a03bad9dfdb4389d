//! NIfTI-1 volume I/O
//!
//! Reads 4D series through a binary mask into a (voxels, timepoints)
//! matrix and scatters matrices back into the mask geometry. Voxels are
//! visited in C order over (x, y, z), so x varies slowest.

use std::path::Path;

use ndarray::{s, Array2, Array3, Array4, ArrayD, ArrayView2, Axis, Ix3, Ix4};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use super::{DataFormat, FormatDescriptor, OutputData};
use crate::error::{Error, Result};

/// Volumetric NIfTI-1 format (`.nii`, `.nii.gz`)
pub struct NiftiVolume;

/// Load header and voxel data (scaled by `scl_slope`/`scl_inter`) as f64.
pub fn load_volume(path: &Path) -> Result<(NiftiHeader, ArrayD<f64>)> {
    let obj = ReaderOptions::new().read_file(path)?;
    let header = obj.header().clone();
    let data = obj.into_volume().into_ndarray::<f64>()?;
    log::debug!("loaded NIfTI {} with shape {:?}", path.display(), data.shape());
    Ok((header, data))
}

/// Load a series as (x, y, z, t); a 3D volume becomes a single timepoint.
pub fn load_series(path: &Path) -> Result<(NiftiHeader, Array4<f64>)> {
    let (header, data) = load_volume(path)?;
    let found = data.shape().to_vec();
    let data = match data.ndim() {
        3 => data.insert_axis(Axis(3)),
        4 => data,
        _ => {
            return Err(Error::ShapeMismatch {
                what: "time series must be 3D or 4D",
                expected: vec![0, 0, 0, 0],
                found,
            })
        }
    };
    let data = data
        .into_dimensionality::<Ix4>()
        .map_err(|_| Error::ShapeMismatch { what: "time series", expected: vec![0, 0, 0, 0], found })?;
    Ok((header, data))
}

/// Load a 3D label or mask volume; a trailing singleton 4th axis is dropped.
pub fn load_labels(path: &Path) -> Result<(NiftiHeader, Array3<f64>)> {
    let (header, data) = load_volume(path)?;
    let found = data.shape().to_vec();
    let data = if data.ndim() == 4 && found[3] == 1 {
        data.index_axis_move(Axis(3), 0)
    } else {
        data
    };
    let data = data
        .into_dimensionality::<Ix3>()
        .map_err(|_| Error::ShapeMismatch { what: "label volume must be 3D", expected: vec![0, 0, 0], found })?;
    Ok((header, data))
}

/// Load a binary mask; any non-zero voxel is inside.
pub fn load_mask(path: &Path) -> Result<(NiftiHeader, Array3<bool>)> {
    let (header, labels) = load_labels(path)?;
    let mask = labels.mapv(|v| v != 0.0);
    log::debug!(
        "mask {} has {} in-mask voxels",
        path.display(),
        mask.iter().filter(|&&m| m).count()
    );
    Ok((header, mask))
}

/// Gather in-mask voxel time series into a (voxels, timepoints) matrix.
pub fn apply_mask(series: &Array4<f64>, mask: &Array3<bool>) -> Result<Array2<f64>> {
    let (nx, ny, nz, nt) = series.dim();
    if mask.dim() != (nx, ny, nz) {
        return Err(Error::ShapeMismatch {
            what: "mask and series spatial dimensions",
            expected: vec![nx, ny, nz],
            found: mask.shape().to_vec(),
        });
    }

    let n_voxels = mask.iter().filter(|&&m| m).count();
    let mut out = Array2::<f64>::zeros((n_voxels, nt));
    let mut row = 0;
    for ((i, j, k), &inside) in mask.indexed_iter() {
        if inside {
            out.row_mut(row).assign(&series.slice(s![i, j, k, ..]));
            row += 1;
        }
    }
    Ok(out)
}

/// Scatter a (voxels, timepoints) matrix back into the mask geometry.
pub fn unmask(data: ArrayView2<'_, f64>, mask: &Array3<bool>) -> Result<Array4<f64>> {
    let n_voxels = mask.iter().filter(|&&m| m).count();
    if data.nrows() != n_voxels {
        return Err(Error::ShapeMismatch {
            what: "rows vs in-mask voxels",
            expected: vec![n_voxels],
            found: vec![data.nrows()],
        });
    }

    let (nx, ny, nz) = mask.dim();
    let mut out = Array4::<f64>::zeros((nx, ny, nz, data.ncols()));
    let mut row = 0;
    for ((i, j, k), &inside) in mask.indexed_iter() {
        if inside {
            out.slice_mut(s![i, j, k, ..]).assign(&data.row(row));
            row += 1;
        }
    }
    Ok(out)
}

/// Write `data` with `header` as reference; gzip is chosen from the extension.
pub fn save_volume<D: ndarray::Dimension + ndarray::RemoveAxis>(
    path: &Path,
    header: &NiftiHeader,
    data: &ndarray::Array<f64, D>,
) -> Result<()> {
    WriterOptions::new(path).reference_header(header).write_nifti(data)?;
    Ok(())
}

impl FormatDescriptor for NiftiVolume {
    fn format(&self) -> DataFormat {
        DataFormat::VolumetricNifti
    }

    fn read(&self, path: &Path, mask: Option<&Path>) -> Result<Array2<f64>> {
        let mask_path = mask.ok_or(Error::MissingMask)?;
        let (_, mask) = load_mask(mask_path)?;
        let (_, series) = load_series(path)?;
        apply_mask(&series, &mask)
    }

    /// Output geometry (affine, voxel sizes) comes from the mask header; the
    /// template only fixes the format. `pixdim[4]` is set to `tr`.
    fn write(
        &self,
        data: &OutputData,
        _template: &Path,
        path: &Path,
        mask: Option<&Path>,
        tr: f64,
    ) -> Result<()> {
        let mask_path = mask.ok_or(Error::MissingMask)?;
        let (mut header, mask) = load_mask(mask_path)?;
        header.pixdim[4] = tr as f32;
        header.scl_slope = 1.0;
        header.scl_inter = 0.0;

        let volume = unmask(data.as_series(), &mask)?;
        match data {
            OutputData::Map(_) => save_volume(path, &header, &volume.index_axis_move(Axis(3), 0)),
            OutputData::Series(_) => save_volume(path, &header, &volume),
        }
    }
}
