//! NQR-Core: Foundation types for NQR/NMR measurements
//!
//! The measurement record, its time-to-frequency transform, fit results and
//! acquisition settings shared by the processing, simulation and module crates.

pub mod acquisition;
pub mod error;
pub mod fit_types;
pub mod measurement;
pub mod transform;

pub use acquisition::{parse_averages, parse_frequency_mhz, AcquisitionSettings};
pub use error::{NqrError, NqrResult};
pub use fit_types::{FitDomain, FitParameter, FitRecord};
pub use measurement::{Measurement, SampleStats, FILE_EXTENSION};
pub use num_complex::Complex;
