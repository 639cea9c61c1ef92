//! Decay envelopes for simulated free induction decays

use serde::{Deserialize, Serialize};

/// Amplitude envelope of a simulated FID
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DecayEnvelope {
    /// `exp(-t / T2star)`, the usual inhomogeneous decay
    Exponential { t2star_us: f64 },
    /// `exp(-(t / T2star)^2)`, as seen for broad solid-state lines
    Gaussian { t2star_us: f64 },
    /// No decay
    Constant,
}

impl DecayEnvelope {
    /// Envelope value at time `t_us`
    pub fn amplitude_at(&self, t_us: f64) -> f64 {
        match self {
            DecayEnvelope::Exponential { t2star_us } => (-t_us / t2star_us).exp(),
            DecayEnvelope::Gaussian { t2star_us } => (-(t_us / t2star_us).powi(2)).exp(),
            DecayEnvelope::Constant => 1.0,
        }
    }

    /// Decay constant, if the envelope has one
    pub fn t2star_us(&self) -> Option<f64> {
        match self {
            DecayEnvelope::Exponential { t2star_us } | DecayEnvelope::Gaussian { t2star_us } => {
                Some(*t2star_us)
            }
            DecayEnvelope::Constant => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DecayEnvelope::Exponential { .. } => "Exponential decay",
            DecayEnvelope::Gaussian { .. } => "Gaussian decay",
            DecayEnvelope::Constant => "No decay",
        }
    }

    /// Common envelopes by name
    pub fn presets() -> Vec<(&'static str, DecayEnvelope)> {
        vec![
            ("Narrow line", DecayEnvelope::Exponential { t2star_us: 200.0 }),
            ("Typical line", DecayEnvelope::Exponential { t2star_us: 50.0 }),
            ("Broad line", DecayEnvelope::Exponential { t2star_us: 10.0 }),
            ("Solid echo", DecayEnvelope::Gaussian { t2star_us: 20.0 }),
            ("Continuous", DecayEnvelope::Constant),
        ]
    }
}

impl Default for DecayEnvelope {
    fn default() -> Self {
        DecayEnvelope::Exponential { t2star_us: 50.0 }
    }
}
