//! NQR-Measurement: the measurement module
//!
//! Model, controller and async service that drive a spectrometer backend,
//! keep the measurement history and apply post-processing to it.

pub mod controller;
pub mod model;
pub mod service;

pub use controller::{MeasurementController, Notification, NotificationLevel};
pub use model::{FitCurve, MeasurementModel, PlotData, ViewMode};
pub use service::{start_measurement_service, MeasurementService, ModuleCommand, ModuleUpdate};
