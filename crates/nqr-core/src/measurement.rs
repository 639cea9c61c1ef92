//! Measurement: container for one acquired NQR signal
//!
//! Holds the raw time-domain samples together with the spectrum derived from
//! them. The spectrum is recomputed every time the raw data changes, so the
//! two representations can never disagree.

use crate::error::{NqrError, NqrResult};
use crate::fit_types::FitRecord;
use crate::measurement_error;
use crate::transform;
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

/// File extension used for saved measurements
pub const FILE_EXTENSION: &str = "quack";

/// One acquired signal and its frequency-domain representation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MeasurementFile")]
pub struct Measurement {
    /// Unique identifier for this measurement
    #[serde(skip)]
    id: Uuid,
    /// Display name
    pub name: String,
    /// Time axis in microseconds
    tdx: Vec<f64>,
    /// Complex time-domain samples
    tdy: Vec<Complex<f64>>,
    /// Spectrometer frequency in Hz
    target_frequency: f64,
    /// Receiver intermediate frequency in Hz
    #[serde(rename = "IF_frequency")]
    if_frequency: f64,
    /// Offset added to the frequency axis in Hz
    frequency_shift: f64,
    /// Fits made on this data
    fits: Vec<FitRecord>,
    /// Frequency axis in MHz
    #[serde(skip)]
    fdx: Vec<f64>,
    /// Complex spectrum
    #[serde(skip)]
    fdy: Vec<Complex<f64>>,
    /// Creation timestamp (ms since epoch)
    #[serde(skip)]
    created_at: u64,
}

/// On-disk layout; older files lack the optional fields
#[derive(Deserialize)]
struct MeasurementFile {
    name: String,
    tdx: Vec<f64>,
    tdy: Vec<Complex<f64>>,
    target_frequency: f64,
    #[serde(rename = "IF_frequency", default)]
    if_frequency: f64,
    #[serde(default)]
    frequency_shift: f64,
    #[serde(default)]
    fits: Vec<FitRecord>,
}

impl TryFrom<MeasurementFile> for Measurement {
    type Error = NqrError;

    fn try_from(file: MeasurementFile) -> NqrResult<Self> {
        let mut measurement = Measurement::new(file.name, file.tdx, file.tdy, file.target_frequency)?
            .with_if_frequency(file.if_frequency)?
            .with_frequency_shift(file.frequency_shift)?;
        measurement.fits = file.fits;
        Ok(measurement)
    }
}

impl Measurement {
    /// Create a measurement from raw samples and compute its spectrum
    pub fn new(
        name: impl Into<String>,
        tdx: Vec<f64>,
        tdy: Vec<Complex<f64>>,
        target_frequency: f64,
    ) -> NqrResult<Self> {
        Self::validate_time_domain(&tdx, &tdy)?;
        check_frequency("target frequency", target_frequency)?;

        let spectrum = transform::forward(&tdx, &tdy, 0.0)?;

        Ok(Measurement {
            id: Uuid::new_v4(),
            name: name.into(),
            tdx,
            tdy,
            target_frequency,
            if_frequency: 0.0,
            frequency_shift: 0.0,
            fits: Vec::new(),
            fdx: spectrum.fdx,
            fdy: spectrum.fdy,
            created_at: now_millis(),
        })
    }

    /// Set the receiver intermediate frequency
    pub fn with_if_frequency(mut self, if_frequency: f64) -> NqrResult<Self> {
        check_frequency("IF frequency", if_frequency)?;
        self.if_frequency = if_frequency;
        Ok(self)
    }

    /// Set the frequency axis offset and recompute the axis
    pub fn with_frequency_shift(mut self, frequency_shift: f64) -> NqrResult<Self> {
        check_frequency("frequency shift", frequency_shift)?;
        self.frequency_shift = frequency_shift;
        self.recompute_spectrum()?;
        Ok(self)
    }

    /// Check that a time series can be transformed
    pub fn validate_time_domain(tdx: &[f64], tdy: &[Complex<f64>]) -> NqrResult<()> {
        if tdx.len() != tdy.len() {
            return Err(NqrError::LengthMismatch {
                time_points: tdx.len(),
                samples: tdy.len(),
            });
        }

        if tdx.len() < 2 {
            return Err(measurement_error!("need at least 2 samples, got {}", tdx.len()));
        }

        if tdx.iter().any(|t| !t.is_finite()) {
            return Err(measurement_error!("time axis contains non-finite values"));
        }

        if let Some(i) = tdy.iter().position(|y| !(y.re.is_finite() && y.im.is_finite())) {
            return Err(measurement_error!("sample {} is not finite: {}", i, tdy[i]));
        }

        if let Some(i) = tdx.windows(2).position(|w| w[1] <= w[0]) {
            return Err(measurement_error!(
                "time axis must be strictly increasing (index {}: {} -> {})",
                i, tdx[i], tdx[i + 1]
            ));
        }

        Ok(())
    }

    /// Replace the raw data; the spectrum is recomputed and old fits dropped
    pub fn set_time_domain(&mut self, tdx: Vec<f64>, tdy: Vec<Complex<f64>>) -> NqrResult<()> {
        Self::validate_time_domain(&tdx, &tdy)?;

        let spectrum = transform::forward(&tdx, &tdy, self.frequency_shift)?;
        self.tdx = tdx;
        self.tdy = tdy;
        self.fdx = spectrum.fdx;
        self.fdy = spectrum.fdy;

        if !self.fits.is_empty() {
            debug!("Dropping {} fits after raw data change on '{}'", self.fits.len(), self.name);
            self.fits.clear();
        }

        Ok(())
    }

    /// New measurement on the same axis and frequencies with different samples
    pub fn derive(&self, tdy: Vec<Complex<f64>>) -> NqrResult<Measurement> {
        Measurement::new(self.name.clone(), self.tdx.clone(), tdy, self.target_frequency)?
            .with_if_frequency(self.if_frequency)?
            .with_frequency_shift(self.frequency_shift)
    }

    fn recompute_spectrum(&mut self) -> NqrResult<()> {
        let spectrum = transform::forward(&self.tdx, &self.tdy, self.frequency_shift)?;
        self.fdx = spectrum.fdx;
        self.fdy = spectrum.fdy;
        Ok(())
    }

    /// Unique identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.tdx.len()
    }

    /// Check if the measurement has no samples
    pub fn is_empty(&self) -> bool {
        self.tdx.is_empty()
    }

    /// Time axis in microseconds
    pub fn tdx(&self) -> &[f64] {
        &self.tdx
    }

    /// Complex time-domain samples
    pub fn tdy(&self) -> &[Complex<f64>] {
        &self.tdy
    }

    /// Frequency axis in MHz
    pub fn fdx(&self) -> &[f64] {
        &self.fdx
    }

    /// Complex spectrum
    pub fn fdy(&self) -> &[Complex<f64>] {
        &self.fdy
    }

    /// Spectrometer frequency in Hz
    pub fn target_frequency(&self) -> f64 {
        self.target_frequency
    }

    /// Receiver intermediate frequency in Hz
    pub fn if_frequency(&self) -> f64 {
        self.if_frequency
    }

    /// Frequency axis offset in Hz
    pub fn frequency_shift(&self) -> f64 {
        self.frequency_shift
    }

    /// Creation timestamp in milliseconds since the epoch
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Acquisition window length in microseconds
    pub fn duration_us(&self) -> f64 {
        self.tdx[self.tdx.len() - 1] - self.tdx[0]
    }

    /// Spacing between the first two samples in microseconds
    pub fn dwell_time_us(&self) -> f64 {
        self.tdx[1] - self.tdx[0]
    }

    /// Magnitude of the time-domain signal
    pub fn time_magnitude(&self) -> Vec<f64> {
        self.tdy.iter().map(|c| c.norm()).collect()
    }

    /// Magnitude of the spectrum
    pub fn frequency_magnitude(&self) -> Vec<f64> {
        self.fdy.iter().map(|c| c.norm()).collect()
    }

    /// Largest time-domain magnitude
    pub fn max_magnitude(&self) -> f64 {
        self.tdy.iter().map(|c| c.norm()).fold(0.0, f64::max)
    }

    /// Statistics of the time-domain magnitude
    pub fn sample_stats(&self) -> SampleStats {
        SampleStats::calculate(&self.time_magnitude())
    }

    /// Fits attached to this measurement
    pub fn fits(&self) -> &[FitRecord] {
        &self.fits
    }

    /// Fit with the given name
    pub fn fit(&self, name: &str) -> Option<&FitRecord> {
        self.fits.iter().find(|f| f.name == name)
    }

    /// Attach a fit, replacing an earlier fit with the same name
    pub fn add_fit(&mut self, fit: FitRecord) {
        self.fits.retain(|f| f.name != fit.name);
        self.fits.push(fit);
    }

    /// Remove a fit by name, returning it if present
    pub fn remove_fit(&mut self, name: &str) -> Option<FitRecord> {
        let index = self.fits.iter().position(|f| f.name == name)?;
        Some(self.fits.remove(index))
    }

    /// Serialize to the measurement file format
    pub fn to_json(&self) -> NqrResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the measurement file format
    pub fn from_json(json: &str) -> NqrResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the measurement to `path`
    pub fn save(&self, path: impl AsRef<Path>) -> NqrResult<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|e| NqrError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        debug!("Saved measurement '{}' to {}", self.name, path.display());
        Ok(())
    }

    /// Read a measurement from `path`
    pub fn load(path: impl AsRef<Path>) -> NqrResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => NqrError::FileNotFound {
                path: path.display().to_string(),
            },
            _ => NqrError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            },
        })?;

        let measurement = Self::from_json(&json)?;
        debug!("Loaded measurement '{}' ({} samples) from {}",
               measurement.name, measurement.len(), path.display());
        Ok(measurement)
    }
}

fn check_frequency(what: &str, value: f64) -> NqrResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(measurement_error!("{} must be finite, got {}", what, value))
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Basic statistics for a magnitude series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    pub mean: f64,
    pub rms: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub peak_to_peak: f64,
}

impl SampleStats {
    pub fn calculate(data: &[f64]) -> Self {
        if data.is_empty() {
            return Self {
                mean: 0.0,
                rms: 0.0,
                std_dev: 0.0,
                min: 0.0,
                max: 0.0,
                peak_to_peak: 0.0,
            };
        }

        let n = data.len() as f64;
        let mean = data.iter().sum::<f64>() / n;

        let sum_sq: f64 = data.iter().map(|x| x * x).sum();
        let rms = (sum_sq / n).sqrt();

        let variance = data.iter()
            .map(|x| (x - mean).powi(2))
            .sum::<f64>() / n;
        let std_dev = variance.sqrt();

        let min = data.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let max = data.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

        Self {
            mean,
            rms,
            std_dev,
            min,
            max,
            peak_to_peak: max - min,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit_types::{FitDomain, FitParameter};

    fn decaying_signal(n: usize) -> Measurement {
        let tdx: Vec<f64> = (0..n).map(|i| i as f64 * 0.5).collect();
        let tdy = tdx
            .iter()
            .map(|&t| Complex::from_polar((-t / 20.0).exp(), 0.3 * t))
            .collect();
        Measurement::new("FID", tdx, tdy, 83.56e6).unwrap()
    }

    fn fit_record(name: &str) -> FitRecord {
        FitRecord {
            name: name.to_string(),
            domain: FitDomain::Time,
            parameters: vec![FitParameter { name: "T2star".to_string(), value: 20.0 }],
            covariance: vec![vec![1.0]],
            x: vec![0.0],
            y: vec![1.0],
        }
    }

    #[test]
    fn test_measurement_creation() {
        let m = decaying_signal(128);

        assert_eq!(m.len(), 128);
        assert_eq!(m.fdx().len(), 128);
        assert_eq!(m.fdy().len(), 128);
        assert!((m.duration_us() - 63.5).abs() < 1e-12);
        assert!((m.dwell_time_us() - 0.5).abs() < 1e-12);
        assert!((m.max_magnitude() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_measurements() {
        let tdy = vec![Complex::new(1.0, 0.0); 3];
        assert!(matches!(
            Measurement::new("x", vec![0.0, 1.0], tdy.clone(), 1e6),
            Err(NqrError::LengthMismatch { .. })
        ));
        assert!(Measurement::new("x", vec![0.0], tdy[..1].to_vec(), 1e6).is_err());
        assert!(Measurement::new("x", vec![0.0, 2.0, 1.0], tdy.clone(), 1e6).is_err());
        assert!(Measurement::new("x", vec![0.0, f64::NAN, 1.0], tdy, 1e6).is_err());
    }

    #[test]
    fn test_set_time_domain_recomputes_spectrum() {
        let mut m = decaying_signal(64);
        m.add_fit(fit_record("T2*"));
        let before = m.fdy().to_vec();

        let tdx = m.tdx().to_vec();
        let tdy = vec![Complex::new(1.0, 0.0); 64];
        m.set_time_domain(tdx, tdy).unwrap();

        assert_ne!(before, m.fdy());
        // DC bin sits at the centre after the shift
        assert!((m.fdy()[32].norm() - 8.0).abs() < 1e-9);
        assert!(m.fits().is_empty());
    }

    #[test]
    fn test_frequency_shift_moves_axis() {
        let m = decaying_signal(16).with_frequency_shift(1e6).unwrap();
        let plain = decaying_signal(16);
        assert!((m.fdx()[0] - plain.fdx()[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_fit_management() {
        let mut m = decaying_signal(16);
        m.add_fit(fit_record("T2*"));
        m.add_fit(fit_record("T2*"));
        m.add_fit(fit_record("Lorentzian"));

        assert_eq!(m.fits().len(), 2);
        assert!(m.fit("T2*").is_some());
        assert!(m.remove_fit("T2*").is_some());
        assert!(m.remove_fit("T2*").is_none());
        assert_eq!(m.fits().len(), 1);
    }

    #[test]
    fn test_json_roundtrip() {
        let mut m = decaying_signal(100)
            .with_if_frequency(2e5)
            .unwrap()
            .with_frequency_shift(1.5e5)
            .unwrap();
        m.add_fit(fit_record("T2*"));

        let json = m.to_json().unwrap();
        assert!(json.contains("\"IF_frequency\""));

        let restored = Measurement::from_json(&json).unwrap();
        assert_eq!(restored.name, m.name);
        assert_eq!(restored.if_frequency(), 2e5);
        assert_eq!(restored.frequency_shift(), 1.5e5);
        assert_eq!(restored.fits(), m.fits());
        assert_ne!(restored.id(), m.id());

        for (a, b) in m.tdy().iter().zip(restored.tdy()) {
            assert!((a - b).norm() < 1e-12);
        }
        for (a, b) in m.fdy().iter().zip(restored.fdy()) {
            assert!((a - b).norm() < 1e-9);
        }
        assert_eq!(restored.fdx().len(), m.fdx().len());
        for (a, b) in m.fdx().iter().zip(restored.fdx()) {
            assert!((a - b).abs() < 1e-12);
        }
        // 150 kHz shift on a MHz axis
        let unshifted = decaying_signal(100);
        assert!((restored.fdx()[0] - unshifted.fdx()[0] - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let tdx: Vec<f64> = (0..4).map(|i| i as f64).collect();
        let mut tdy = vec![Complex::new(1.0, 0.0); 4];
        tdy[1] = Complex::new(f64::NAN, 0.0);
        assert!(matches!(
            Measurement::new("nan", tdx.clone(), tdy, 83.56e6),
            Err(NqrError::InvalidMeasurement { .. })
        ));

        let mut tdy = vec![Complex::new(1.0, 0.0); 4];
        tdy[3] = Complex::new(0.0, f64::INFINITY);
        assert!(Measurement::new("inf", tdx.clone(), tdy, 83.56e6).is_err());

        let tdy = vec![Complex::new(1.0, 0.0); 4];
        assert!(Measurement::new("f", tdx.clone(), tdy.clone(), f64::NAN).is_err());

        let m = Measurement::new("ok", tdx, tdy, 83.56e6).unwrap();
        assert!(m.clone().with_if_frequency(f64::INFINITY).is_err());
        assert!(m.clone().with_frequency_shift(f64::NAN).is_err());

        let json = m.to_json().unwrap();
        assert!(!json.contains("null"));
        assert!(Measurement::from_json(&json).is_ok());

        let mut m = m;
        let bad = vec![Complex::new(f64::NAN, 0.0); 4];
        assert!(m.set_time_domain((0..4).map(|i| i as f64).collect(), bad).is_err());
        assert!(m.tdy().iter().all(|y| y.re == 1.0));
    }

    #[test]
    fn test_legacy_file_without_optional_fields() {
        let json = r#"{"name":"old","tdx":[0.0,1.0,2.0],"tdy":[[1.0,0.0],[0.5,0.5],[0.0,0.25]],"target_frequency":8.0e7}"#;
        let m = Measurement::from_json(json).unwrap();

        assert_eq!(m.len(), 3);
        assert_eq!(m.frequency_shift(), 0.0);
        assert_eq!(m.if_frequency(), 0.0);
        assert_eq!(m.tdy()[1], Complex::new(0.5, 0.5));
    }

    #[test]
    fn test_invalid_file_contents() {
        assert!(matches!(
            Measurement::from_json("{\"name\": \"x\"}"),
            Err(NqrError::FormatError { .. })
        ));
        assert!(Measurement::from_json(
            r#"{"name":"x","tdx":[0.0],"tdy":[[1.0,0.0]],"target_frequency":1.0}"#
        ).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("fid.{}", FILE_EXTENSION));

        let m = decaying_signal(32);
        m.save(&path).unwrap();
        let loaded = Measurement::load(&path).unwrap();

        assert_eq!(loaded.len(), 32);
        assert_eq!(loaded.tdx(), m.tdx());

        let missing = Measurement::load(dir.path().join("missing.quack"));
        assert!(matches!(missing, Err(NqrError::FileNotFound { .. })));
    }

    #[test]
    fn test_sample_stats() {
        let stats = SampleStats::calculate(&[1.0, 2.0, 3.0, 4.0]);
        assert!((stats.mean - 2.5).abs() < 1e-12);
        assert_eq!(stats.peak_to_peak, 3.0);

        let empty = SampleStats::calculate(&[]);
        assert_eq!(empty.max, 0.0);
    }
}
