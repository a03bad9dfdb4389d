//! Matrix I/O adapter
//!
//! Converts volumetric (NIfTI-1), grayordinate (CIFTI-2) and surface (GIFTI)
//! time series into a dense location-by-time matrix and back again.
//!
//! - `nifti_io`: masked NIfTI-1 volumes via the `nifti` crate
//! - `nifti2`: NIfTI-2 header codec used as the CIFTI container
//! - `cifti`: CIFTI-2 dense series/scalar files
//! - `gifti`: GIFTI functional and surface-geometry files
//! - `tsv`: tab-separated numeric matrices

pub mod nifti_io;
pub mod nifti2;
pub mod cifti;
pub mod gifti;
pub mod tsv;

use std::path::Path;

use ndarray::{Array, Array1, Array2, ArrayView2, ArrayViewD, Axis, Dimension, Ix1, Ix2};

use crate::config::{ReadOptions, WriteOptions};
use crate::error::{Error, Result};

pub use cifti::CiftiDense;
pub use gifti::GiftiFunc;
pub use nifti_io::NiftiVolume;

/// Closed set of supported data layouts, resolved once from the file name
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataFormat {
    /// NIfTI-1 volume series (`.nii`, `.nii.gz`), read through a binary mask
    VolumetricNifti,
    /// CIFTI-2 dense file (`.dtseries.nii`, `.dscalar.nii`)
    CiftiGrayordinate,
    /// GIFTI surface file (`.func.gii`, `.shape.gii`, ...)
    GiftiSurface,
}

const CIFTI_DENSE_SUFFIXES: [&str; 2] = [".dtseries.nii", ".dscalar.nii"];
const CIFTI_OTHER_SUFFIXES: [&str; 6] = [
    ".dconn.nii", ".dlabel.nii", ".ptseries.nii", ".pscalar.nii", ".pconn.nii", ".plabel.nii",
];

impl DataFormat {
    /// Resolve the format from a file name.
    pub fn detect(path: &Path) -> Result<DataFormat> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if CIFTI_DENSE_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            Ok(DataFormat::CiftiGrayordinate)
        } else if CIFTI_OTHER_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            Err(Error::UnsupportedFormat { path: path.to_path_buf() })
        } else if name.ends_with(".nii.gz") || name.ends_with(".nii") {
            Ok(DataFormat::VolumetricNifti)
        } else if name.ends_with(".gii") {
            Ok(DataFormat::GiftiSurface)
        } else {
            Err(Error::UnsupportedFormat { path: path.to_path_buf() })
        }
    }

    /// Implementation of the read/write capabilities for this format.
    pub fn descriptor(self) -> &'static dyn FormatDescriptor {
        match self {
            DataFormat::VolumetricNifti => &NiftiVolume,
            DataFormat::CiftiGrayordinate => &CiftiDense,
            DataFormat::GiftiSurface => &GiftiFunc,
        }
    }

    /// Whether reads and writes need a binary mask.
    pub fn requires_mask(self) -> bool {
        matches!(self, DataFormat::VolumetricNifti)
    }

    /// Extension appended to derived output files.
    pub fn output_extension(self) -> &'static str {
        match self {
            DataFormat::VolumetricNifti => ".nii.gz",
            DataFormat::CiftiGrayordinate => ".dtseries.nii",
            DataFormat::GiftiSurface => ".shape.gii",
        }
    }
}

/// Data handed to a writer: either a single map or a series.
#[derive(Clone, Debug, PartialEq)]
pub enum OutputData {
    /// One value per location
    Map(Array1<f64>),
    /// Locations by timepoints
    Series(Array2<f64>),
}

impl OutputData {
    /// Accept a 1-D or 2-D array, anything else is a `Dimensionality` error.
    pub fn from_dyn(data: ArrayViewD<'_, f64>) -> Result<Self> {
        match data.ndim() {
            1 => {
                let map = data
                    .into_dimensionality::<Ix1>()
                    .map_err(|_| Error::Dimensionality { ndim: 1 })?;
                Ok(OutputData::Map(map.to_owned()))
            }
            2 => {
                let series = data
                    .into_dimensionality::<Ix2>()
                    .map_err(|_| Error::Dimensionality { ndim: 2 })?;
                Ok(OutputData::Series(series.to_owned()))
            }
            ndim => Err(Error::Dimensionality { ndim }),
        }
    }

    pub fn n_locations(&self) -> usize {
        match self {
            OutputData::Map(m) => m.len(),
            OutputData::Series(s) => s.nrows(),
        }
    }

    /// Number of timepoints; a single map reports 0.
    pub fn n_timepoints(&self) -> usize {
        match self {
            OutputData::Map(_) => 0,
            OutputData::Series(s) => s.ncols(),
        }
    }

    /// View as a (locations, columns) matrix; a map becomes one column.
    pub fn as_series(&self) -> ArrayView2<'_, f64> {
        match self {
            OutputData::Map(m) => m.view().insert_axis(Axis(1)),
            OutputData::Series(s) => s.view(),
        }
    }

    fn rescale(&mut self, scale: f64) {
        match self {
            OutputData::Map(m) => rescale(m, scale),
            OutputData::Series(s) => rescale(s, scale),
        }
    }
}

/// Read/write capability set, one implementation per `DataFormat`
pub trait FormatDescriptor: Sync {
    fn format(&self) -> DataFormat;

    /// Whether `path` belongs to this format.
    fn detect(&self, path: &Path) -> bool {
        DataFormat::detect(path).map(|f| f == self.format()).unwrap_or(false)
    }

    /// Read a (locations, timepoints) matrix.
    fn read(&self, path: &Path, mask: Option<&Path>) -> Result<Array2<f64>>;

    /// Write `data` to `path`, taking geometry from `template`.
    fn write(
        &self,
        data: &OutputData,
        template: &Path,
        path: &Path,
        mask: Option<&Path>,
        tr: f64,
    ) -> Result<()>;
}

/// Read any supported file into a location-by-time matrix.
///
/// CIFTI and GIFTI inputs ignore `mask`; NIfTI inputs require it.
pub fn read_matrix(path: &Path, mask: Option<&Path>, options: &ReadOptions) -> Result<Array2<f64>> {
    let format = DataFormat::detect(path)?;
    if format.requires_mask() && mask.is_none() {
        return Err(Error::MissingMask);
    }

    let mut data = format.descriptor().read(path, mask)?;
    if options.scale > 0.0 {
        rescale(&mut data, options.scale);
    }

    log::info!(
        "read {:?} {}: {} locations x {} timepoints",
        format,
        path.display(),
        data.nrows(),
        data.ncols()
    );
    Ok(data)
}

/// Write a 1-D or 2-D location-major array using `template` for geometry.
pub fn write_matrix(
    data: ArrayViewD<'_, f64>,
    template: &Path,
    path: &Path,
    mask: Option<&Path>,
    options: &WriteOptions,
) -> Result<()> {
    let mut output = OutputData::from_dyn(data)?;
    let format = DataFormat::detect(template)?;
    if format.requires_mask() && mask.is_none() {
        return Err(Error::MissingMask);
    }
    if options.scale > 0.0 {
        output.rescale(options.scale);
    }

    log::info!(
        "write {:?} {}: {} locations x {} timepoints, TR={}",
        format,
        path.display(),
        output.n_locations(),
        output.n_timepoints(),
        options.tr
    );
    format.descriptor().write(&output, template, path, mask, options.tr)
}

/// Min-max rescale of the whole array into `[x_min, x_max]`.
///
/// A constant array maps to `x_min` (the range denominator falls back to 1).
/// A NaN anywhere makes the minimum and maximum NaN, so every value becomes NaN.
pub fn rescale_between<D: Dimension>(data: &mut Array<f64, D>, x_min: f64, x_max: f64) {
    if data.iter().any(|v| v.is_nan()) {
        data.fill(f64::NAN);
        return;
    }
    let lo = data.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !lo.is_finite() || !hi.is_finite() {
        return;
    }

    let mut denom = hi - lo;
    if denom == 0.0 {
        denom = 1.0;
    }
    let span = x_max - x_min;
    data.mapv_inplace(|v| x_min + (v - lo) * span / denom);
}

/// Rescale into `[-scale, scale]`; no-op unless `scale > 0`.
pub fn rescale<D: Dimension>(data: &mut Array<f64, D>, scale: f64) {
    if scale > 0.0 {
        rescale_between(data, -scale, scale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2, Array3};
    use std::path::PathBuf;

    #[test]
    fn test_detect_formats() {
        let cases = [
            ("sub-01_bold.dtseries.nii", DataFormat::CiftiGrayordinate),
            ("sub-01_reho.dscalar.nii", DataFormat::CiftiGrayordinate),
            ("sub-01_bold.nii.gz", DataFormat::VolumetricNifti),
            ("sub-01_bold.nii", DataFormat::VolumetricNifti),
            ("lh.func.gii", DataFormat::GiftiSurface),
            ("lh.shape.gii", DataFormat::GiftiSurface),
            ("SUB-01_BOLD.NII.GZ", DataFormat::VolumetricNifti),
        ];
        for (name, expected) in cases {
            assert_eq!(DataFormat::detect(&PathBuf::from(name)).unwrap(), expected, "{}", name);
        }
    }

    #[test]
    fn test_detect_rejects_unknown() {
        for name in ["bold.mgz", "bold.dconn.nii", "bold.ptseries.nii", "bold.txt"] {
            let err = DataFormat::detect(&PathBuf::from(name)).unwrap_err();
            assert!(matches!(err, Error::UnsupportedFormat { .. }), "{}", name);
        }
    }

    #[test]
    fn test_descriptor_round_trip() {
        for format in [DataFormat::VolumetricNifti, DataFormat::CiftiGrayordinate, DataFormat::GiftiSurface] {
            assert_eq!(format.descriptor().format(), format);
        }
        assert!(CiftiDense.detect(Path::new("a.dtseries.nii")));
        assert!(!NiftiVolume.detect(Path::new("a.dtseries.nii")));
    }

    #[test]
    fn test_volumetric_read_requires_mask() {
        let err = read_matrix(Path::new("missing_bold.nii.gz"), None, &ReadOptions::default()).unwrap_err();
        assert!(matches!(err, Error::MissingMask));
    }

    #[test]
    fn test_write_rejects_rank_three() {
        let data = Array3::<f64>::zeros((2, 2, 2));
        let err = write_matrix(
            data.view().into_dyn(),
            Path::new("template.dtseries.nii"),
            Path::new("out.dtseries.nii"),
            None,
            &WriteOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Dimensionality { ndim: 3 }));
    }

    #[test]
    fn test_output_data_shapes() {
        let map = OutputData::from_dyn(arr1(&[1.0, 2.0, 3.0]).view().into_dyn()).unwrap();
        assert_eq!(map.n_locations(), 3);
        assert_eq!(map.n_timepoints(), 0);
        assert_eq!(map.as_series().dim(), (3, 1));

        let series = OutputData::from_dyn(arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]).view().into_dyn()).unwrap();
        assert_eq!(series.n_timepoints(), 2);
        assert_eq!(series.as_series().dim(), (3, 2));
    }

    #[test]
    fn test_rescale_range() {
        let mut data = arr2(&[[0.0, 5.0], [10.0, 2.5]]);
        rescale(&mut data, 1.0);
        assert_abs_diff_eq!(data[[0, 0]], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(data[[1, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(data[[0, 1]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(data[[1, 1]], -0.5, epsilon = 1e-12);

        // Reapplying onto the same range leaves values unchanged
        let before = data.clone();
        rescale(&mut data, 1.0);
        for (a, b) in data.iter().zip(before.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rescale_noop_and_constant() {
        let mut data = arr1(&[3.0, 4.0]);
        rescale(&mut data, 0.0);
        assert_eq!(data, arr1(&[3.0, 4.0]));

        let mut constant = arr1(&[7.0, 7.0, 7.0]);
        rescale(&mut constant, 2.0);
        assert_eq!(constant, arr1(&[-2.0, -2.0, -2.0]));
    }

    #[test]
    fn test_rescale_nan_spreads() {
        let mut data = arr1(&[0.0, f64::NAN, 10.0]);
        rescale(&mut data, 1.0);
        assert!(data.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_scale_options_through_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let bold = dir.path().join("bold.dtseries.nii");
        crate::io::cifti::tests::write_dtseries(&bold, 6, 5, 4);

        let scaled = read_matrix(&bold, None, &ReadOptions { scale: 1.0 }).unwrap();
        assert_abs_diff_eq!(scaled.iter().cloned().fold(f64::INFINITY, f64::min), -1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(scaled.iter().cloned().fold(f64::NEG_INFINITY, f64::max), 1.0, epsilon = 1e-9);

        let raw = read_matrix(&bold, None, &ReadOptions::default()).unwrap();
        let out = dir.path().join("scaled.dtseries.nii");
        let options = WriteOptions { tr: 1.0, scale: 2.0 };
        write_matrix(raw.view().into_dyn(), &bold, &out, None, &options).unwrap();

        let written = read_matrix(&out, None, &ReadOptions::default()).unwrap();
        assert_eq!(written.dim(), raw.dim());
        assert_abs_diff_eq!(written[[0, 0]], -2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(written[[8, 5]], 2.0, epsilon = 1e-6);
        for (w, s) in written.iter().zip(scaled.iter()) {
            assert_abs_diff_eq!(*w, 2.0 * s, epsilon = 1e-6);
        }
    }
}
