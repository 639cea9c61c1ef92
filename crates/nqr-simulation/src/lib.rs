//! NQR-Simulation: simulated signals and spectrometer backend
//!
//! Generates free induction decays and serves them through a channel-driven
//! spectrometer task, for testing and development without hardware.

pub mod fid_simulator;
pub mod signal_patterns;
pub mod spectrometer;

pub use fid_simulator::*;
pub use signal_patterns::*;
pub use spectrometer::*;
