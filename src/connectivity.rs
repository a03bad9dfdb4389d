//! Atlas-based functional connectivity
//!
//! Region signals are plain means over the voxels carrying each non-zero
//! atlas label (no smoothing, no standardization). Regions are ordered by
//! ascending label value.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{Array2, Array3, Array4, ArrayView2, Axis};

use crate::error::{Error, Result};
use crate::io::nifti_io::{load_labels, load_series};
use crate::io::tsv::write_tsv;

/// Region signals and their correlation
#[derive(Clone, Debug, PartialEq)]
pub struct Connectivity {
    /// Atlas label of each region column
    pub labels: Vec<i64>,
    /// (timepoints, regions)
    pub timeseries: Array2<f64>,
    /// (regions, regions) Pearson correlation
    pub correlation: Array2<f64>,
}

/// Mean signal per atlas label: returns the labels and a (T, R) matrix.
pub fn extract_timeseries(series: &Array4<f64>, atlas: &Array3<f64>) -> Result<(Vec<i64>, Array2<f64>)> {
    let (nx, ny, nz, nt) = series.dim();
    if atlas.dim() != (nx, ny, nz) {
        return Err(Error::ShapeMismatch {
            what: "atlas and series spatial dimensions",
            expected: vec![nx, ny, nz],
            found: atlas.shape().to_vec(),
        });
    }

    let mut columns: BTreeMap<i64, usize> = BTreeMap::new();
    for &value in atlas.iter() {
        let label = value.round() as i64;
        if label != 0 {
            columns.entry(label).or_insert(0);
        }
    }
    for (column, slot) in columns.values_mut().enumerate() {
        *slot = column;
    }

    let mut sums = Array2::<f64>::zeros((nt, columns.len()));
    let mut counts = vec![0usize; columns.len()];
    for ((i, j, k), &value) in atlas.indexed_iter() {
        let Some(&column) = columns.get(&(value.round() as i64)) else {
            continue;
        };
        counts[column] += 1;
        let voxel = series.slice(ndarray::s![i, j, k, ..]);
        sums.column_mut(column).scaled_add(1.0, &voxel);
    }
    for (mut column, &count) in sums.axis_iter_mut(Axis(1)).zip(counts.iter()) {
        column /= count as f64;
    }

    log::debug!("extracted {} regions over {} timepoints", columns.len(), nt);
    Ok((columns.into_keys().collect(), sums))
}

/// Pearson correlation between the columns of a (T, R) matrix.
///
/// A zero-variance column yields NaN in its row and column, diagonal
/// included. Finite values are clipped to [-1, 1].
pub fn correlation_matrix(timeseries: ArrayView2<'_, f64>) -> Array2<f64> {
    let n_regions = timeseries.ncols();
    let means = timeseries.mean_axis(Axis(0));
    let mut centered = timeseries.to_owned();
    if let Some(means) = means {
        centered -= &means;
    }

    let cov = centered.t().dot(&centered);
    let sd: Vec<f64> = (0..n_regions).map(|r| cov[[r, r]].sqrt()).collect();
    Array2::from_shape_fn((n_regions, n_regions), |(a, b)| {
        let r = cov[[a, b]] / (sd[a] * sd[b]);
        if r.is_finite() {
            r.clamp(-1.0, 1.0)
        } else {
            f64::NAN
        }
    })
}

/// Extract region signals from a volumetric series and write both the
/// (T, R) time series and the (R, R) correlation as TSV.
pub fn extract_timeseries_funct(
    in_file: &Path,
    atlas: &Path,
    timeseries_path: &Path,
    fcon_path: &Path,
) -> Result<Connectivity> {
    let (_, series) = load_series(in_file)?;
    let (_, atlas_data) = load_labels(atlas)?;
    let (labels, timeseries) = extract_timeseries(&series, &atlas_data)?;
    let correlation = correlation_matrix(timeseries.view());

    let n_nan = correlation.iter().filter(|v| v.is_nan()).count();
    if n_nan > 0 {
        log::warn!("{} correlation entries are NaN (zero-variance regions)", n_nan);
    }
    log::info!(
        "connectivity for {}: {} regions x {} timepoints",
        in_file.display(),
        labels.len(),
        timeseries.nrows()
    );

    write_tsv(timeseries_path, timeseries.view())?;
    write_tsv(fcon_path, correlation.view())?;
    Ok(Connectivity { labels, timeseries, correlation })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::nifti_io::save_volume;
    use crate::io::tsv::read_tsv;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;
    use nifti::NiftiHeader;
    use tempfile::tempdir;

    /// Three slabs along x labelled 1, 2, 5; label 0 fills x = 0.
    fn slab_atlas() -> Array3<f64> {
        Array3::from_shape_fn((4, 3, 3), |(i, _, _)| [0.0, 1.0, 2.0, 5.0][i])
    }

    fn scaled_series(atlas: &Array3<f64>, nt: usize) -> Array4<f64> {
        Array4::from_shape_fn((4, 3, 3, nt), |(i, j, k, t)| {
            atlas[[i, j, k]] * ((t as f64 * 0.7).sin() + 2.0)
        })
    }

    #[test]
    fn test_region_means() {
        let atlas = slab_atlas();
        let series = Array4::from_shape_fn((4, 3, 3, 2), |(i, j, _, t)| (i * 10 + j + t) as f64);
        let (labels, ts) = extract_timeseries(&series, &atlas).unwrap();
        assert_eq!(labels, vec![1, 2, 5]);
        assert_eq!(ts.dim(), (2, 3));
        // x = 1 slab: mean over j of 10 + j + t = 11 + t
        assert_abs_diff_eq!(ts[[0, 0]], 11.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ts[[1, 2]], 32.0, epsilon = 1e-12);
    }

    #[test]
    fn test_scaled_copies_fully_correlated() {
        let atlas = slab_atlas();
        let (_, ts) = extract_timeseries(&scaled_series(&atlas, 30), &atlas).unwrap();
        let corr = correlation_matrix(ts.view());
        assert_eq!(corr.dim(), (3, 3));
        for &r in corr.iter() {
            assert_abs_diff_eq!(r, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_constant_region_is_nan() {
        let ts = arr2(&[[1.0, 4.0, 2.0], [2.0, 4.0, 4.0], [3.0, 4.0, 6.0]]);
        let corr = correlation_matrix(ts.view());
        assert_abs_diff_eq!(corr[[0, 2]], 1.0, epsilon = 1e-12);
        assert!(corr[[1, 1]].is_nan());
        assert!(corr[[0, 1]].is_nan());
        assert!(corr[[1, 2]].is_nan());
    }

    #[test]
    fn test_atlas_shape_mismatch() {
        let series = Array4::<f64>::zeros((4, 3, 3, 5));
        let atlas = Array3::<f64>::zeros((4, 3, 2));
        assert!(matches!(extract_timeseries(&series, &atlas), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_writes_tsv_files() {
        let dir = tempdir().unwrap();
        let header = NiftiHeader::default();
        let atlas = slab_atlas();
        let atlas_path = dir.path().join("atlas.nii.gz");
        let bold_path = dir.path().join("bold.nii.gz");
        save_volume(&atlas_path, &header, &atlas).unwrap();
        save_volume(&bold_path, &header, &scaled_series(&atlas, 12)).unwrap();

        let ts_path = dir.path().join("timeseries.tsv");
        let fcon_path = dir.path().join("fcon.tsv");
        let result = extract_timeseries_funct(&bold_path, &atlas_path, &ts_path, &fcon_path).unwrap();
        assert_eq!(result.labels, vec![1, 2, 5]);

        let ts = read_tsv(&ts_path).unwrap();
        assert_eq!(ts.dim(), (12, 3));
        let fcon = read_tsv(&fcon_path).unwrap();
        assert_eq!(fcon.dim(), (3, 3));
        assert_abs_diff_eq!(fcon[[0, 2]], 1.0, epsilon = 1e-6);
    }
}
