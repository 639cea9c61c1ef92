//! Free induction decay simulator

use crate::signal_patterns::DecayEnvelope;
use nqr_core::{config_error, AcquisitionSettings, Complex, Measurement, NqrError, NqrResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

/// Configuration for FID simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FidConfig {
    /// Number of complex samples
    pub points: usize,
    /// Sample spacing in microseconds
    pub dwell_time_us: f64,
    /// Initial signal amplitude
    pub amplitude: f64,
    /// Offset of the resonance from the receiver frequency in Hz
    pub offset_frequency_hz: f64,
    /// Receiver phase in radians
    pub phase_rad: f64,
    /// Signal decay
    pub envelope: DecayEnvelope,
    /// Noise standard deviation of a single scan, per quadrature channel
    pub noise_std: f64,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
}

impl Default for FidConfig {
    fn default() -> Self {
        Self {
            points: 1024,
            dwell_time_us: 0.5,
            amplitude: 1.0,
            offset_frequency_hz: 50e3,
            phase_rad: 0.0,
            envelope: DecayEnvelope::default(),
            noise_std: 0.05,
            seed: None,
        }
    }
}

impl FidConfig {
    pub fn validate(&self) -> NqrResult<()> {
        if self.points < 2 {
            return Err(config_error!("FID needs at least 2 points, got {}", self.points));
        }
        if !(self.dwell_time_us.is_finite() && self.dwell_time_us > 0.0) {
            return Err(config_error!("dwell time must be positive, got {}", self.dwell_time_us));
        }
        if !(self.noise_std.is_finite() && self.noise_std >= 0.0) {
            return Err(config_error!("noise standard deviation must be non-negative, got {}", self.noise_std));
        }
        if !(self.amplitude.is_finite() && self.offset_frequency_hz.is_finite() && self.phase_rad.is_finite()) {
            return Err(config_error!("amplitude, offset and phase must be finite"));
        }
        if let Some(t2) = self.envelope.t2star_us() {
            if !(t2.is_finite() && t2 > 0.0) {
                return Err(config_error!("T2* must be positive, got {}", t2));
            }
        }
        Ok(())
    }
}

/// FID simulator
pub struct FidSimulator {
    config: FidConfig,
    rng: StdRng,
    target_frequency_hz: f64,
    scans: u64,
}

impl FidSimulator {
    /// Create new simulator with configuration
    pub fn new(config: FidConfig) -> NqrResult<Self> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(FidSimulator {
            config,
            rng,
            target_frequency_hz: AcquisitionSettings::default().frequency_hz,
            scans: 0,
        })
    }

    /// Frequency recorded in generated measurements
    pub fn set_target_frequency(&mut self, frequency_hz: f64) {
        self.target_frequency_hz = frequency_hz;
    }

    pub fn target_frequency(&self) -> f64 {
        self.target_frequency_hz
    }

    /// Generate one averaged acquisition
    ///
    /// Averaging `n` scans leaves the signal intact and divides the noise
    /// standard deviation by `sqrt(n)`.
    pub fn generate(&mut self, averages: u32) -> NqrResult<Measurement> {
        AcquisitionSettings::validate_averages(averages)?;

        let sigma = self.config.noise_std / (averages as f64).sqrt();
        let noise = Normal::new(0.0, sigma).map_err(|e| NqrError::BackendError {
            reason: format!("Failed to create normal distribution: {}", e),
        })?;

        let config = &self.config;
        let omega = 2.0 * PI * config.offset_frequency_hz * 1e-6;

        let tdx: Vec<f64> = (0..config.points).map(|i| i as f64 * config.dwell_time_us).collect();
        let tdy = tdx
            .iter()
            .map(|&t| {
                let signal = Complex::from_polar(
                    config.amplitude * config.envelope.amplitude_at(t),
                    omega * t + config.phase_rad,
                );
                signal + Complex::new(noise.sample(&mut self.rng), noise.sample(&mut self.rng))
            })
            .collect();

        self.scans += averages as u64;
        debug!(
            "Simulated FID: {} points, {} averages, noise {:.3e} ({} scans total)",
            config.points, averages, sigma, self.scans
        );

        Measurement::new(
            format!("FID {:.3} MHz", self.target_frequency_hz / 1e6),
            tdx,
            tdy,
            self.target_frequency_hz,
        )
    }

    /// Get current configuration
    pub fn config(&self) -> &FidConfig {
        &self.config
    }

    /// Update configuration
    pub fn update_config(&mut self, config: FidConfig) -> NqrResult<()> {
        config.validate()?;
        if let Some(seed) = config.seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.config = config;
        Ok(())
    }

    /// Total number of scans simulated so far
    pub fn scans(&self) -> u64 {
        self.scans
    }
}
