//! Error handling for the NQR measurement crates
//!
//! Every library operation returns [`NqrResult`]; the variants carry enough
//! context to be shown to an operator as a notification.

use std::fmt;

/// Result type alias for measurement operations
pub type NqrResult<T> = Result<T, NqrError>;

/// Error type for all measurement, transform and processing operations
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum NqrError {
    /// Time and amplitude series do not describe a usable measurement
    InvalidMeasurement {
        /// Description of the data problem
        reason: String,
    },

    /// Time and amplitude series have different lengths
    LengthMismatch {
        /// Number of time points
        time_points: usize,
        /// Number of amplitude samples
        samples: usize,
    },

    /// Acquisition parameter outside the accepted range
    InvalidSetting {
        /// Setting name
        setting: &'static str,
        /// Rejected value as entered
        value: String,
        /// Valid range description
        valid_range: String,
    },

    /// Window or model function could not be built or evaluated
    FunctionError {
        /// Function name
        function: String,
        /// Description of the failure
        reason: String,
    },

    /// Least-squares fit did not produce a result
    FitFailed {
        /// Fit model name
        model: String,
        /// Description of the failure
        reason: String,
    },

    /// Processing or pipeline configuration problem
    ConfigurationError {
        /// Description of the configuration error
        message: String,
    },

    /// Measurement file could not be parsed
    FormatError {
        /// Description of format issue
        reason: String,
    },

    /// Measurement file does not exist
    FileNotFound {
        /// Path that was requested
        path: String,
    },

    /// File system failure while reading or writing measurements
    Io {
        /// Path involved in the operation
        path: String,
        /// Underlying I/O error text
        reason: String,
    },

    /// Spectrometer backend or channel failure
    BackendError {
        /// Backend-related error description
        reason: String,
    },
}

impl fmt::Display for NqrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NqrError::InvalidMeasurement { reason } => {
                write!(f, "Invalid measurement: {}", reason)
            }
            NqrError::LengthMismatch { time_points, samples } => {
                write!(f, "Length mismatch: {} time points, {} samples",
                       time_points, samples)
            }
            NqrError::InvalidSetting { setting, value, valid_range } => {
                write!(f, "Invalid {}: '{}', valid range: {}",
                       setting, value, valid_range)
            }
            NqrError::FunctionError { function, reason } => {
                write!(f, "Function '{}' error: {}", function, reason)
            }
            NqrError::FitFailed { model, reason } => {
                write!(f, "Fit '{}' failed: {}", model, reason)
            }
            NqrError::ConfigurationError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            NqrError::FormatError { reason } => {
                write!(f, "Format error: {}", reason)
            }
            NqrError::FileNotFound { path } => {
                write!(f, "File not found: {}", path)
            }
            NqrError::Io { path, reason } => {
                write!(f, "I/O error on '{}': {}", path, reason)
            }
            NqrError::BackendError { reason } => {
                write!(f, "Backend error: {}", reason)
            }
        }
    }
}

impl std::error::Error for NqrError {}

impl From<serde_json::Error> for NqrError {
    fn from(err: serde_json::Error) -> Self {
        NqrError::FormatError {
            reason: err.to_string(),
        }
    }
}

/// Convenience macro for creating measurement data errors
#[macro_export]
macro_rules! measurement_error {
    ($($arg:tt)+) => {
        $crate::error::NqrError::InvalidMeasurement {
            reason: format!($($arg)+),
        }
    };
}

/// Convenience macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)+) => {
        $crate::error::NqrError::ConfigurationError {
            message: format!($($arg)+),
        }
    };
}
