//! Parameter structs passed in by the orchestration layer.
//!
//! All of them deserialize from JSON/TOML with `serde`, and every field has a
//! default so partial documents are accepted.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// ALFF parameters
///
/// Naming follows filter terminology, which inverts the frequency order:
/// `high_pass` is the **lower** edge of the integration band and `low_pass`
/// the **upper** edge. Spectral bins are selected as `[high_pass, low_pass)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlffParams {
    /// Repetition time (sampling period) in seconds
    pub tr: f64,
    /// Low-pass cutoff in Hz; the upper band edge
    pub low_pass: f64,
    /// High-pass cutoff in Hz; the lower band edge
    pub high_pass: f64,
}

impl Default for AlffParams {
    fn default() -> Self {
        Self {
            tr: 1.0,
            low_pass: 0.10,
            high_pass: 0.01,
        }
    }
}

impl AlffParams {
    /// Check the sampling period and band edges.
    ///
    /// Edge ordering is not checked; an inverted band is a numeric
    /// degeneracy that yields NaN from the engine.
    pub fn validate(&self) -> Result<()> {
        validate_tr(self.tr)?;
        SpectralBand::new(self.high_pass, self.low_pass).map(|_| ())
    }

    /// Integration band in increasing-frequency order.
    pub fn band(&self) -> Result<SpectralBand> {
        SpectralBand::new(self.high_pass, self.low_pass)
    }

    /// Sampling frequency in Hz.
    pub fn sampling_frequency(&self) -> f64 {
        1.0 / self.tr
    }
}

/// Frequency window in Hz, `low_hz` first.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectralBand {
    pub low_hz: f64,
    pub high_hz: f64,
}

impl SpectralBand {
    pub fn new(low_hz: f64, high_hz: f64) -> Result<Self> {
        for (name, value) in [("high_pass", low_hz), ("low_pass", high_hz)] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidParameter {
                    name,
                    reason: format!("band edge must be finite and non-negative, got {}", value),
                });
            }
        }
        Ok(Self { low_hz, high_hz })
    }

    /// True when the edges are in increasing order.
    pub fn is_ordered(&self) -> bool {
        self.low_hz < self.high_hz
    }
}

/// Options for reading a data file into a location-by-time matrix
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Rescale into `[-scale, scale]` when positive
    pub scale: f64,
}

/// Options for writing a matrix back to a data file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Sampling period recorded in the output header, in seconds
    pub tr: f64,
    /// Rescale into `[-scale, scale]` before writing when positive
    pub scale: f64,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { tr: 1.0, scale: 0.0 }
    }
}

impl WriteOptions {
    pub fn with_tr(tr: f64) -> Self {
        Self { tr, ..Self::default() }
    }
}

pub(crate) fn validate_tr(tr: f64) -> Result<()> {
    if tr.is_finite() && tr > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidParameter {
            name: "tr",
            reason: format!("repetition time must be > 0, got {}", tr),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alff_defaults() {
        let params = AlffParams::default();
        assert_eq!(params.low_pass, 0.10);
        assert_eq!(params.high_pass, 0.01);
        assert!(params.validate().is_ok());

        let band = params.band().unwrap();
        assert_eq!(band.low_hz, 0.01);
        assert_eq!(band.high_hz, 0.10);
        assert!(band.is_ordered());
    }

    #[test]
    fn test_rejects_bad_tr() {
        let params = AlffParams { tr: 0.0, ..AlffParams::default() };
        let err = params.validate().unwrap_err();
        assert!(err.is_configuration());

        let params = AlffParams { tr: f64::NAN, ..AlffParams::default() };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_inverted_band_is_not_a_config_error() {
        let params = AlffParams { tr: 2.0, low_pass: 0.01, high_pass: 0.08 };
        assert!(params.validate().is_ok());
        assert!(!params.band().unwrap().is_ordered());
    }

    #[test]
    fn test_negative_edge_rejected() {
        assert!(SpectralBand::new(-0.01, 0.1).is_err());
        assert!(SpectralBand::new(0.01, f64::INFINITY).is_err());
    }

    #[test]
    fn test_partial_json() {
        let params: AlffParams = serde_json::from_str(r#"{"tr": 0.8}"#).unwrap();
        assert_eq!(params.tr, 0.8);
        assert_eq!(params.low_pass, 0.10);

        let opts: WriteOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts.tr, 1.0);
        assert_eq!(opts.scale, 0.0);
    }
}
