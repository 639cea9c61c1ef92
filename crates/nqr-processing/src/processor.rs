//! Core measurement processor trait and types

use nqr_core::{Measurement, NqrResult, NqrError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// Core trait for all measurement processors
pub trait MeasurementProcessor: Send + Sync {
    /// Process a measurement and return the processed result
    fn process(&mut self, input: &Measurement) -> NqrResult<Measurement>;

    /// Get processor configuration
    fn config(&self) -> &ProcessorConfig;

    /// Update processor configuration
    fn update_config(&mut self, config: ProcessorConfig) -> NqrResult<()>;

    /// Get processor name/identifier
    fn name(&self) -> &str;

    /// Reset processor internal state
    fn reset(&mut self) {}

    /// Check if processor can handle the given measurement
    fn can_process(&self, measurement: &Measurement) -> bool {
        measurement.len() >= 2
    }

    /// Get processor type for pipeline organization
    fn processor_type(&self) -> ProcessorType;
}

/// Types of measurement processors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessorType {
    /// Window applied to the time-domain signal
    Apodization,
    /// Model fitted to the signal
    Fit,
}

/// Generic processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Processor name
    pub name: String,
    /// Processor type
    pub processor_type: ProcessorType,
    /// Enabled/disabled state
    pub enabled: bool,
    /// Processing parameters
    pub parameters: HashMap<String, ParameterValue>,
}

/// Parameter value types for flexible configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    String(String),
}

/// Timing and outcome of one processing step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingMetrics {
    /// Processor that produced these metrics
    pub processor: String,
    /// Actual processing time in microseconds
    pub processing_time_us: u64,
    /// Success/failure status
    pub success: bool,
    /// Error message if processing failed
    pub error_message: Option<String>,
}

impl ProcessorConfig {
    /// Create new processor configuration
    pub fn new(name: &str, processor_type: ProcessorType) -> Self {
        Self {
            name: name.to_string(),
            processor_type,
            enabled: true,
            parameters: HashMap::new(),
        }
    }

    /// Set a parameter value
    pub fn set_parameter(&mut self, key: &str, value: ParameterValue) {
        self.parameters.insert(key.to_string(), value);
    }

    /// Get a parameter value
    pub fn get_parameter(&self, key: &str) -> Option<&ParameterValue> {
        self.parameters.get(key)
    }

    /// Get float parameter with default
    pub fn get_float(&self, key: &str, default: f64) -> f64 {
        self.get_parameter(key)
            .and_then(ParameterValue::as_float)
            .unwrap_or(default)
    }

    /// Get boolean parameter with default
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get_parameter(key)
            .and_then(ParameterValue::as_bool)
            .unwrap_or(default)
    }

    /// Get string parameter
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get_parameter(key).and_then(ParameterValue::as_str)
    }

    /// Validate configuration
    pub fn validate(&self) -> NqrResult<()> {
        if self.name.is_empty() {
            return Err(NqrError::ConfigurationError {
                message: "Processor name cannot be empty".to_string(),
            });
        }

        Ok(())
    }
}

impl ProcessingMetrics {
    /// Start timing a processing operation
    pub fn start_timing(processor: &str) -> ProcessingTimer {
        ProcessingTimer {
            start_time: Instant::now(),
            processor: processor.to_string(),
        }
    }
}

/// Helper for timing processing operations
pub struct ProcessingTimer {
    start_time: Instant,
    processor: String,
}

impl ProcessingTimer {
    /// Finish timing and return metrics
    pub fn finish(self) -> ProcessingMetrics {
        ProcessingMetrics {
            processing_time_us: self.start_time.elapsed().as_micros() as u64,
            processor: self.processor,
            success: true,
            error_message: None,
        }
    }

    /// Finish with error
    pub fn finish_with_error(self, error: &str) -> ProcessingMetrics {
        let mut metrics = self.finish();
        metrics.success = false;
        metrics.error_message = Some(error.to_string());
        metrics
    }
}

impl ParameterValue {
    /// Convert to f64 if possible
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParameterValue::Float(v) => Some(*v),
            ParameterValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Convert to bool if possible
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrow as string if possible
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParameterValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        ParameterValue::Float(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::Integer(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        ParameterValue::Boolean(value)
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        ParameterValue::String(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::String(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processor_config() {
        let mut config = ProcessorConfig::new("window", ProcessorType::Apodization);

        config.set_parameter("T2star", ParameterValue::Float(12.5));
        config.set_parameter("time_axis", ParameterValue::Boolean(true));
        config.set_parameter("function", "FID".into());

        assert_eq!(config.get_float("T2star", 0.0), 12.5);
        assert!(config.get_bool("time_axis", false));
        assert_eq!(config.get_str("function"), Some("FID"));
        assert_eq!(config.get_float("missing", 3.0), 3.0);

        assert!(config.validate().is_ok());
        config.name.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_processing_metrics() {
        let timer = ProcessingMetrics::start_timing("window");
        let metrics = timer.finish();
        assert!(metrics.success);
        assert_eq!(metrics.processor, "window");

        let failed = ProcessingMetrics::start_timing("fit").finish_with_error("singular");
        assert!(!failed.success);
        assert_eq!(failed.error_message.as_deref(), Some("singular"));
    }

    #[test]
    fn test_parameter_value_conversions() {
        assert_eq!(ParameterValue::Integer(4).as_float(), Some(4.0));
        assert_eq!(ParameterValue::Float(2.5).as_bool(), None);
        assert_eq!(ParameterValue::from("x").as_str(), Some("x"));
    }
}
