//! Simulated spectrometer backend driven over channels
//!
//! The backend receives [`SpectrometerCommand`]s on an mpsc channel and
//! publishes [`SpectrometerEvent`]s on a broadcast channel, so any number of
//! front ends can follow it.

use crate::fid_simulator::{FidConfig, FidSimulator};
use nqr_core::{config_error, Measurement, NqrResult};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

/// Commands accepted by the backend
#[derive(Debug, Clone, PartialEq)]
pub enum SpectrometerCommand {
    /// Measurement frequency as entered, in MHz
    SetFrequency(String),
    /// Number of averages as entered
    SetAverages(String),
    StartMeasurement,
    Shutdown,
}

/// Events published by the backend
#[derive(Debug, Clone)]
pub enum SpectrometerEvent {
    MeasurementData(Measurement),
    MeasurementError(String),
    /// Rejected frequency text
    FailureSetFrequency(String),
    /// Rejected averages text
    FailureSetAverages(String),
    /// Name of the spectrometer now serving commands
    ActiveSpectrometerChanged(String),
}

/// Limits and timing of the simulated hardware
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrometerConfig {
    /// Name announced to front ends
    pub name: String,
    /// Signal the backend acquires
    pub fid: FidConfig,
    pub min_frequency_mhz: f64,
    pub max_frequency_mhz: f64,
    pub max_averages: u32,
    /// Simulated acquisition time per scan
    pub scan_time_us: u64,
    /// Capacity of the event channel
    pub event_buffer: usize,
}

impl Default for SpectrometerConfig {
    fn default() -> Self {
        Self {
            name: "Simulator".to_string(),
            fid: FidConfig::default(),
            min_frequency_mhz: 20.0,
            max_frequency_mhz: 500.0,
            max_averages: 100_000,
            scan_time_us: 10,
            event_buffer: 32,
        }
    }
}

impl SpectrometerConfig {
    pub fn validate(&self) -> NqrResult<()> {
        if self.name.is_empty() {
            return Err(config_error!("spectrometer name cannot be empty"));
        }
        if !(self.min_frequency_mhz > 0.0 && self.min_frequency_mhz < self.max_frequency_mhz) {
            return Err(config_error!(
                "invalid frequency range {}-{} MHz",
                self.min_frequency_mhz, self.max_frequency_mhz
            ));
        }
        if self.max_averages == 0 {
            return Err(config_error!("max_averages must be at least 1"));
        }
        if self.event_buffer == 0 {
            return Err(config_error!("event buffer must hold at least one event"));
        }
        self.fid.validate()
    }
}

/// Simulated spectrometer task
pub struct SimulatedSpectrometer {
    config: SpectrometerConfig,
    simulator: FidSimulator,
    frequency_hz: Option<f64>,
    averages: u32,
    event_sender: broadcast::Sender<SpectrometerEvent>,
    command_receiver: mpsc::Receiver<SpectrometerCommand>,
    command_sender: mpsc::Sender<SpectrometerCommand>,
}

impl SimulatedSpectrometer {
    pub fn new(config: SpectrometerConfig) -> NqrResult<Self> {
        config.validate()?;

        let simulator = FidSimulator::new(config.fid.clone())?;
        let (event_sender, _) = broadcast::channel(config.event_buffer);
        let (command_sender, command_receiver) = mpsc::channel(32);

        Ok(SimulatedSpectrometer {
            config,
            simulator,
            frequency_hz: None,
            averages: 1,
            event_sender,
            command_receiver,
            command_sender,
        })
    }

    /// Get a receiver for backend events
    pub fn subscribe(&self) -> broadcast::Receiver<SpectrometerEvent> {
        self.event_sender.subscribe()
    }

    /// Get a sender for backend commands
    pub fn command_handle(&self) -> mpsc::Sender<SpectrometerCommand> {
        self.command_sender.clone()
    }

    pub fn config(&self) -> &SpectrometerConfig {
        &self.config
    }

    /// Serve commands until `Shutdown` or until every sender is dropped
    pub async fn run(mut self) {
        info!("Spectrometer '{}' ready", self.config.name);
        self.publish(SpectrometerEvent::ActiveSpectrometerChanged(self.config.name.clone()));

        let acquisition = sleep(Duration::ZERO);
        tokio::pin!(acquisition);
        let mut acquiring = false;

        // release our own sender so the loop ends when every front end is gone
        drop(std::mem::replace(&mut self.command_sender, mpsc::channel(1).0));

        loop {
            tokio::select! {
                () = &mut acquisition, if acquiring => {
                    acquiring = false;
                    self.finish_measurement();
                }

                command = self.command_receiver.recv() => {
                    match command {
                        Some(SpectrometerCommand::SetFrequency(text)) => self.set_frequency(text),
                        Some(SpectrometerCommand::SetAverages(text)) => self.set_averages(text),
                        Some(SpectrometerCommand::StartMeasurement) => {
                            if acquiring {
                                warn!("Measurement already running, start ignored");
                                continue;
                            }
                            if self.frequency_hz.is_none() {
                                self.publish(SpectrometerEvent::MeasurementError(
                                    "Frequency not set".to_string(),
                                ));
                                continue;
                            }
                            let duration = Duration::from_micros(
                                self.config.scan_time_us.saturating_mul(self.averages as u64),
                            );
                            debug!("Acquiring {} averages ({:?})", self.averages, duration);
                            acquisition.as_mut().reset(Instant::now() + duration);
                            acquiring = true;
                        }
                        Some(SpectrometerCommand::Shutdown) => {
                            info!("Spectrometer '{}' shut down", self.config.name);
                            break;
                        }
                        None => {
                            debug!("Spectrometer command channel closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn set_frequency(&mut self, text: String) {
        let range = self.config.min_frequency_mhz..=self.config.max_frequency_mhz;
        match text.trim().parse::<f64>() {
            Ok(mhz) if range.contains(&mhz) => {
                debug!("Frequency set to {} MHz", mhz);
                self.frequency_hz = Some(mhz * 1e6);
                self.simulator.set_target_frequency(mhz * 1e6);
            }
            _ => {
                warn!("Rejected frequency '{}'", text);
                self.publish(SpectrometerEvent::FailureSetFrequency(text));
            }
        }
    }

    fn set_averages(&mut self, text: String) {
        match text.trim().parse::<u32>() {
            Ok(averages) if (1..=self.config.max_averages).contains(&averages) => {
                debug!("Averages set to {}", averages);
                self.averages = averages;
            }
            _ => {
                warn!("Rejected averages '{}'", text);
                self.publish(SpectrometerEvent::FailureSetAverages(text));
            }
        }
    }

    fn finish_measurement(&mut self) {
        let event = match self.simulator.generate(self.averages) {
            Ok(measurement) => {
                info!("Acquired '{}' ({} samples)", measurement.name, measurement.len());
                SpectrometerEvent::MeasurementData(measurement)
            }
            Err(e) => {
                warn!("Acquisition failed: {}", e);
                SpectrometerEvent::MeasurementError(e.to_string())
            }
        };
        self.publish(event);
    }

    fn publish(&self, event: SpectrometerEvent) {
        // no subscribers is not an error for the backend
        if self.event_sender.send(event).is_err() {
            debug!("No subscribers for spectrometer event");
        }
    }
}

/// Spawn a simulated spectrometer and return its channel ends
pub fn start_spectrometer(
    config: SpectrometerConfig,
) -> NqrResult<(
    broadcast::Receiver<SpectrometerEvent>,
    mpsc::Sender<SpectrometerCommand>,
    JoinHandle<()>,
)> {
    let spectrometer = SimulatedSpectrometer::new(config)?;
    let events = spectrometer.subscribe();
    let commands = spectrometer.command_handle();

    let handle = tokio::spawn(spectrometer.run());

    Ok((events, commands, handle))
}
