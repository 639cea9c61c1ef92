//! Acquisition settings sent to the spectrometer before a measurement

use crate::error::{NqrError, NqrResult};
use serde::{Deserialize, Serialize};

/// Lowest accepted measurement frequency in MHz
pub const MIN_FREQUENCY_MHZ: f64 = 20.0;
/// Highest accepted measurement frequency in MHz
pub const MAX_FREQUENCY_MHZ: f64 = 1000.0;
/// Lowest accepted number of averages
pub const MIN_AVERAGES: u32 = 1;
/// Highest accepted number of averages
pub const MAX_AVERAGES: u32 = 1_000_000;

/// Frequency and averaging requested for the next acquisition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Measurement frequency in Hz
    pub frequency_hz: f64,
    /// Number of scans averaged by the spectrometer
    pub averages: u32,
}

impl AcquisitionSettings {
    /// Create validated settings
    pub fn new(frequency_hz: f64, averages: u32) -> NqrResult<Self> {
        Self::validate_frequency(frequency_hz)?;
        Self::validate_averages(averages)?;

        Ok(AcquisitionSettings {
            frequency_hz,
            averages,
        })
    }

    /// Validate a frequency given in Hz
    pub fn validate_frequency(frequency_hz: f64) -> NqrResult<()> {
        let mhz = frequency_hz / 1e6;
        if !mhz.is_finite() || !(MIN_FREQUENCY_MHZ..=MAX_FREQUENCY_MHZ).contains(&mhz) {
            Err(NqrError::InvalidSetting {
                setting: "frequency",
                value: format!("{} MHz", mhz),
                valid_range: format!("{}-{} MHz", MIN_FREQUENCY_MHZ, MAX_FREQUENCY_MHZ),
            })
        } else {
            Ok(())
        }
    }

    /// Validate the number of averages
    pub fn validate_averages(averages: u32) -> NqrResult<()> {
        if !(MIN_AVERAGES..=MAX_AVERAGES).contains(&averages) {
            Err(NqrError::InvalidSetting {
                setting: "averages",
                value: averages.to_string(),
                valid_range: format!("{}-{}", MIN_AVERAGES, MAX_AVERAGES),
            })
        } else {
            Ok(())
        }
    }

    /// Frequency in MHz
    pub fn frequency_mhz(&self) -> f64 {
        self.frequency_hz / 1e6
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        AcquisitionSettings {
            frequency_hz: 83.56e6,
            averages: 100,
        }
    }
}

/// Parse operator input in MHz and return the frequency in Hz
pub fn parse_frequency_mhz(text: &str) -> NqrResult<f64> {
    let mhz: f64 = text.trim().parse().map_err(|_| NqrError::InvalidSetting {
        setting: "frequency",
        value: text.to_string(),
        valid_range: format!("{}-{} MHz", MIN_FREQUENCY_MHZ, MAX_FREQUENCY_MHZ),
    })?;

    let hz = mhz * 1e6;
    AcquisitionSettings::validate_frequency(hz)?;
    Ok(hz)
}

/// Parse operator input for the number of averages
pub fn parse_averages(text: &str) -> NqrResult<u32> {
    let averages: u32 = text.trim().parse().map_err(|_| NqrError::InvalidSetting {
        setting: "averages",
        value: text.to_string(),
        valid_range: format!("{}-{}", MIN_AVERAGES, MAX_AVERAGES),
    })?;

    AcquisitionSettings::validate_averages(averages)?;
    Ok(averages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frequency() {
        let hz = parse_frequency_mhz(" 83.56 ").unwrap();
        assert!((hz - 83.56e6).abs() < 1e-3);

        assert!(parse_frequency_mhz("19.9").is_err());
        assert!(parse_frequency_mhz("1000.5").is_err());
        assert!(parse_frequency_mhz("abc").is_err());
    }

    #[test]
    fn test_parse_averages() {
        assert_eq!(parse_averages("1000").unwrap(), 1000);
        assert!(parse_averages("0").is_err());
        assert!(parse_averages("2000000").is_err());
        assert!(parse_averages("-5").is_err());
        assert!(parse_averages("1.5").is_err());
    }

    #[test]
    fn test_settings_validation() {
        assert!(AcquisitionSettings::new(100e6, 16).is_ok());
        assert!(AcquisitionSettings::new(5e6, 16).is_err());
        assert!(AcquisitionSettings::new(100e6, 0).is_err());

        let settings = AcquisitionSettings::default();
        assert!(AcquisitionSettings::validate_frequency(settings.frequency_hz).is_ok());
    }
}
