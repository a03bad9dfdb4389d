//! Amplitude of low-frequency fluctuation
//!
//! Per location: one-sided amplitude spectrum (boxcar window, mean removed,
//! power scaled by `1/N^2` and doubled except at DC and an even-length
//! Nyquist bin), square-rooted, then averaged over the bins between the
//! `high_pass` and `low_pass` cutoffs and doubled.

use std::sync::Arc;

use ndarray::{Array2, ArrayView1, ArrayView2};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

use crate::config::AlffParams;
use crate::error::Result;

/// Reusable FFT plan and buffers for series of one length
pub struct Periodogram {
    n: usize,
    fs: f64,
    fft: Arc<dyn Fft<f64>>,
    buffer: Vec<Complex64>,
    scratch: Vec<Complex64>,
    amplitude: Vec<f64>,
}

impl Periodogram {
    pub fn new(n: usize, fs: f64) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n);
        let scratch = vec![Complex64::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            n,
            fs,
            fft,
            buffer: vec![Complex64::new(0.0, 0.0); n],
            scratch,
            amplitude: vec![0.0; n / 2 + 1],
        }
    }

    /// Bin frequencies `k * fs / n` for `k = 0..=n/2`.
    pub fn frequencies(&self) -> Vec<f64> {
        (0..self.n / 2 + 1).map(|k| k as f64 * self.fs / self.n as f64).collect()
    }

    /// Square root of the one-sided power spectrum of `series`.
    pub fn amplitude(&mut self, series: ArrayView1<'_, f64>) -> &[f64] {
        let n = self.n;
        let mean = series.sum() / n as f64;
        for (slot, &x) in self.buffer.iter_mut().zip(series.iter()) {
            *slot = Complex64::new(x - mean, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let scale = 1.0 / (n as f64 * n as f64);
        let nyquist_is_bin = n % 2 == 0;
        let last = self.amplitude.len() - 1;
        for (k, amp) in self.amplitude.iter_mut().enumerate() {
            let mut power = self.buffer[k].norm_sqr() * scale;
            if k != 0 && !(nyquist_is_bin && k == last) {
                power *= 2.0;
            }
            *amp = power.sqrt();
        }
        &self.amplitude
    }
}

/// Index of the first bin closest to `target`.
fn closest_bin(freqs: &[f64], target: f64) -> usize {
    let mut best = 0;
    for (k, f) in freqs.iter().enumerate() {
        if (f - target).abs() < (freqs[best] - target).abs() {
            best = k;
        }
    }
    best
}

/// ALFF for every row of a (locations, timepoints) matrix, as (L, 1).
///
/// The band is the half-open bin range from the bin nearest `high_pass` to
/// the bin nearest `low_pass`. When that range is empty the result is NaN.
pub fn compute_alff(data: ArrayView2<'_, f64>, params: &AlffParams) -> Result<Array2<f64>> {
    params.validate()?;
    let band = params.band()?;
    let (n_locations, n_timepoints) = data.dim();
    log::info!(
        "ALFF over {} locations x {} timepoints, TR={}, band=[{}, {}] Hz",
        n_locations,
        n_timepoints,
        params.tr,
        band.low_hz,
        band.high_hz
    );
    if !band.is_ordered() {
        log::warn!("high_pass {} Hz is not below low_pass {} Hz", band.low_hz, band.high_hz);
    }

    let mut alff = Array2::from_elem((n_locations, 1), f64::NAN);
    if n_timepoints == 0 {
        log::warn!("ALFF on an empty series; every value is NaN");
        return Ok(alff);
    }

    let mut periodogram = Periodogram::new(n_timepoints, params.sampling_frequency());
    let freqs = periodogram.frequencies();
    let lo_bin = closest_bin(&freqs, params.high_pass);
    let hi_bin = closest_bin(&freqs, params.low_pass);
    if hi_bin <= lo_bin {
        log::warn!(
            "ALFF band selects no bins ({}..{} of {}); output is NaN",
            lo_bin,
            hi_bin,
            freqs.len()
        );
    }
    let width = hi_bin.saturating_sub(lo_bin) as f64;

    for (row, mut out) in data.rows().into_iter().zip(alff.rows_mut()) {
        let amplitude = periodogram.amplitude(row);
        let band = amplitude.get(lo_bin..hi_bin).unwrap_or(&[]);
        out[0] = 2.0 * band.iter().sum::<f64>() / width;
    }
    Ok(alff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    fn params(tr: f64, high_pass: f64, low_pass: f64) -> AlffParams {
        AlffParams { tr, low_pass, high_pass }
    }

    #[test]
    fn test_pure_tone_amplitude() {
        // 5 cycles over 100 samples at fs = 1 Hz sits exactly on bin 5
        let amplitude = 3.0;
        let series = Array1::from_shape_fn(100, |t| 7.0 + amplitude * (2.0 * PI * 5.0 * t as f64 / 100.0).sin());
        let data = series.insert_axis(ndarray::Axis(0));

        let alff = compute_alff(data.view(), &params(1.0, 0.048, 0.058)).unwrap();
        assert_eq!(alff.dim(), (1, 1));
        assert_abs_diff_eq!(alff[[0, 0]], 2.0_f64.sqrt() * amplitude, epsilon = 1e-9);
    }

    #[test]
    fn test_periodogram_scaling() {
        // Even length: DC and Nyquist are not doubled
        let mut periodogram = Periodogram::new(4, 2.0);
        assert_eq!(periodogram.frequencies(), vec![0.0, 0.5, 1.0]);
        let amp = periodogram.amplitude(ndarray::arr1(&[1.0, -1.0, 1.0, -1.0]).view()).to_vec();
        assert_abs_diff_eq!(amp[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(amp[1], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(amp[2], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_constant_series_is_zero() {
        let data = Array2::from_elem((3, 40), 5.0);
        let alff = compute_alff(data.view(), &AlffParams::default()).unwrap();
        for &v in alff.iter() {
            assert_abs_diff_eq!(v, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_widening_band_keeps_white_noise_level() {
        // Flat spectrum: the band mean should not drop when the band grows
        let mut rng = StdRng::seed_from_u64(19);
        let data = Array2::from_shape_fn((10, 4096), |_| rng.gen::<f64>() - 0.5);
        let narrow = compute_alff(data.view(), &params(2.0, 0.01, 0.08)).unwrap();
        let wide = compute_alff(data.view(), &params(2.0, 0.01, 0.20)).unwrap();

        let narrow_mean = narrow.mean().unwrap();
        let wide_mean = wide.mean().unwrap();
        assert!(narrow_mean > 0.0);
        assert!(wide_mean >= 0.9 * narrow_mean, "{} vs {}", wide_mean, narrow_mean);
    }

    #[test]
    fn test_widening_band_increases_band_summed_amplitude() {
        let mut rng = StdRng::seed_from_u64(11);
        let data = Array2::from_shape_fn((20, 200), |_| rng.gen::<f64>() - 0.5);
        let narrow = params(2.0, 0.01, 0.08);
        let wide = params(2.0, 0.01, 0.20);

        let n_bins = |p: &AlffParams| {
            let freqs = Periodogram::new(200, p.sampling_frequency()).frequencies();
            (closest_bin(&freqs, p.low_pass) - closest_bin(&freqs, p.high_pass)) as f64
        };
        let a = compute_alff(data.view(), &narrow).unwrap();
        let b = compute_alff(data.view(), &wide).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!(y * n_bins(&wide) >= x * n_bins(&narrow));
        }
    }

    #[test]
    fn test_widening_band_over_rising_spectrum() {
        // Amplitude grows with frequency, so the band mean grows too
        let n = 128;
        let series = Array1::from_shape_fn(n, |t| {
            (1..40).map(|k| k as f64 * (2.0 * PI * k as f64 * t as f64 / n as f64).cos()).sum::<f64>()
        });
        let data = series.insert_axis(ndarray::Axis(0));
        let narrow = compute_alff(data.view(), &params(1.0, 0.01, 0.1)).unwrap();
        let wide = compute_alff(data.view(), &params(1.0, 0.01, 0.25)).unwrap();
        assert!(wide[[0, 0]] >= narrow[[0, 0]]);
    }

    #[test]
    fn test_inverted_or_empty_band_is_nan() {
        let mut rng = StdRng::seed_from_u64(3);
        let data = Array2::from_shape_fn((4, 64), |_| rng.gen::<f64>());

        let inverted = compute_alff(data.view(), &params(1.0, 0.1, 0.01)).unwrap();
        assert!(inverted.iter().all(|v| v.is_nan()));

        let empty = compute_alff(data.view(), &params(1.0, 0.05, 0.05)).unwrap();
        assert!(empty.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_invalid_tr_rejected() {
        let data = Array2::<f64>::zeros((2, 10));
        let err = compute_alff(data.view(), &params(0.0, 0.01, 0.1)).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { name: "tr", .. }));
    }
}
