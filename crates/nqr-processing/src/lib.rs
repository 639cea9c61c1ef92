//! NQR-Processing: post-processing of NQR measurements
//!
//! Window functions, apodization, least-squares fits and configurable
//! processing pipelines operating on [`nqr_core::Measurement`].

pub mod apodization;
pub mod config;
pub mod fitting;
pub mod functions;
pub mod pipeline;
pub mod processor;

pub use apodization::{apodize, Apodizer};
pub use config::{PipelineConfig, ProcessingConfig};
pub use fitting::{fit, fit_with_options, model_by_name, FitModel, FitOptions, Fitter, LorentzianFit, T2StarFit};
pub use functions::{linspace, Function, FunctionKind, FunctionParameter};
pub use pipeline::*;
pub use processor::{MeasurementProcessor, ParameterValue, ProcessingMetrics, ProcessorConfig, ProcessorType};
