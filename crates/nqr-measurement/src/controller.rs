//! Measurement module controller
//!
//! Translates operator actions into [`SpectrometerCommand`]s and backend
//! [`SpectrometerEvent`]s into model updates. Messages meant for the operator
//! are published as [`Notification`]s.

use crate::model::MeasurementModel;
use nqr_core::{parse_averages, parse_frequency_mhz, Measurement, NqrError, NqrResult};
use nqr_processing::{apodize, fit, FitModel, Function};
use nqr_simulation::{SpectrometerCommand, SpectrometerEvent};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Severity of a [`Notification`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationLevel {
    Info,
    Error,
}

/// Message for the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn info(message: impl Into<String>) -> Self {
        Notification {
            level: NotificationLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Notification {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            NotificationLevel::Info => "Info",
            NotificationLevel::Error => "Error",
        };
        write!(f, "{}: {}", level, self.message)
    }
}

/// Controller of the measurement module
pub struct MeasurementController {
    model: MeasurementModel,
    commands: mpsc::Sender<SpectrometerCommand>,
    notifications: broadcast::Sender<Notification>,
}

impl MeasurementController {
    pub fn new(commands: mpsc::Sender<SpectrometerCommand>) -> Self {
        let (notifications, _) = broadcast::channel(32);
        MeasurementController {
            model: MeasurementModel::new(),
            commands,
            notifications,
        }
    }

    pub fn model(&self) -> &MeasurementModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut MeasurementModel {
        &mut self.model
    }

    pub fn into_model(self) -> MeasurementModel {
        self.model
    }

    /// Get a receiver for operator notifications
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Frequency input changed; `text` is in MHz
    pub fn set_frequency(&mut self, valid: bool, text: &str) {
        self.model.frequency_text = text.to_string();
        self.model.frequency_failed = false;

        match parse_frequency_mhz(text) {
            Ok(hz) if valid => {
                debug!("Frequency input valid: {} MHz", text.trim());
                self.model.frequency_hz = hz;
                self.model.frequency_valid = true;
                self.send(SpectrometerCommand::SetFrequency(text.to_string()));
            }
            _ => {
                debug!("Frequency input invalid: '{}'", text);
                self.model.frequency_valid = false;
            }
        }
    }

    /// Averages input changed
    pub fn set_averages(&mut self, valid: bool, text: &str) {
        self.model.averages_text = text.to_string();
        self.model.averages_failed = false;

        match parse_averages(text) {
            Ok(averages) if valid => {
                debug!("Averages input valid: {}", averages);
                self.model.averages = averages;
                self.model.averages_valid = true;
                self.send(SpectrometerCommand::SetAverages(text.to_string()));
            }
            _ => {
                debug!("Averages input invalid: '{}'", text);
                self.model.averages_valid = false;
            }
        }
    }

    /// Switch between time and frequency domain view
    pub fn change_view_mode(&mut self) {
        self.model.view_mode = self.model.view_mode.toggled();
        debug!("View mode changed to {:?}", self.model.view_mode);
    }

    /// Start an acquisition with the current inputs
    ///
    /// Frequency and averages are sent again before the start so the backend
    /// acquires with what the operator sees. Returns `false` when the inputs
    /// are not valid or the backend cannot be reached.
    pub fn start_measurement(&mut self) -> bool {
        if !self.model.start_enabled() {
            warn!("Measurement not started: invalid frequency or averages");
            return false;
        }

        info!(
            "Starting measurement at {} MHz with {} averages",
            self.model.frequency_text.trim(),
            self.model.averages
        );

        let frequency = self.model.frequency_text.clone();
        let averages = self.model.averages_text.clone();
        self.send(SpectrometerCommand::SetFrequency(frequency));
        self.send(SpectrometerCommand::SetAverages(averages));
        if !self.send(SpectrometerCommand::StartMeasurement) {
            self.notify(Notification::error("Spectrometer did not accept the measurement start."));
            return false;
        }

        self.model.is_measuring = true;
        true
    }

    /// Apply a backend event to the model
    pub fn process_signal(&mut self, event: SpectrometerEvent) {
        match event {
            SpectrometerEvent::MeasurementData(measurement) => {
                if !self.model.is_measuring {
                    debug!("Ignoring measurement '{}' outside an acquisition", measurement.name);
                    return;
                }
                info!("Received measurement '{}'", measurement.name);
                self.model.add_and_display(measurement);
                self.model.is_measuring = false;
            }
            SpectrometerEvent::MeasurementError(message) => {
                if !self.model.is_measuring {
                    debug!("Ignoring measurement error outside an acquisition: {}", message);
                    return;
                }
                warn!("Measurement failed: {}", message);
                self.model.is_measuring = false;
                self.notify(Notification::error(message));
            }
            SpectrometerEvent::FailureSetFrequency(text) => {
                if text == self.model.frequency_text {
                    warn!("Spectrometer rejected frequency '{}'", text);
                    self.model.frequency_failed = true;
                }
            }
            SpectrometerEvent::FailureSetAverages(text) => {
                if text == self.model.averages_text {
                    warn!("Spectrometer rejected averages '{}'", text);
                    self.model.averages_failed = true;
                }
            }
            SpectrometerEvent::ActiveSpectrometerChanged(name) => {
                debug!("Active spectrometer: {}", name);
                self.model.spectrometer_label = format!("Spectrometer: {}", name);
            }
        }
    }

    /// Save the most recent measurement to `path`
    ///
    /// Returns `Ok(false)` when there is nothing to save.
    pub fn save_measurement(&self, path: impl AsRef<Path>) -> NqrResult<bool> {
        let Some(measurement) = self.model.last_measurement() else {
            info!("No measurement to save");
            return Ok(false);
        };

        measurement.save(path.as_ref())?;
        info!("Saved '{}' to {}", measurement.name, path.as_ref().display());
        Ok(true)
    }

    /// Load a measurement file, add it to the history and display it
    pub fn load_measurement(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match Measurement::load(path) {
            Ok(measurement) => {
                info!("Loaded '{}' from {}", measurement.name, path.display());
                self.model.add_and_display(measurement);
                true
            }
            Err(e) => {
                warn!("Could not load {}: {}", path.display(), e);
                let message = match e {
                    NqrError::FileNotFound { .. } => "File not found.".to_string(),
                    NqrError::Io { .. } => e.to_string(),
                    _ => "File is not a valid measurement file.".to_string(),
                };
                self.notify(Notification::error(message));
                false
            }
        }
    }

    /// Apodize the displayed measurement and display the result
    pub fn apodize(&mut self, function: &Function) -> bool {
        let Some(measurement) = self.model.displayed_measurement() else {
            debug!("No measurement to apodize");
            self.notify(Notification::error("No measurement to apodize."));
            return false;
        };

        match apodize(measurement, function) {
            Ok(apodized) => {
                self.model.add_and_display(apodized);
                true
            }
            Err(e) => {
                warn!("Apodization failed: {}", e);
                self.notify(Notification::error(e.to_string()));
                false
            }
        }
    }

    /// Fit `model` to the displayed measurement and attach the result
    pub fn fit(&mut self, model: &dyn FitModel) -> bool {
        let Some(measurement) = self.model.displayed_measurement_mut() else {
            debug!("No measurement to fit");
            self.notify(Notification::error("No measurement to fit."));
            return false;
        };

        match fit(measurement, model) {
            Ok(record) => {
                info!("{} fit attached to '{}'", record.name, measurement.name);
                measurement.add_fit(record);
                true
            }
            Err(e) => {
                warn!("{} fit failed: {}", model.name(), e);
                self.notify(Notification::error(e.to_string()));
                false
            }
        }
    }

    fn send(&self, command: SpectrometerCommand) -> bool {
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(e) => {
                warn!("Spectrometer command not delivered: {}", e);
                false
            }
        }
    }

    fn notify(&self, notification: Notification) {
        if self.notifications.send(notification).is_err() {
            debug!("No subscribers for notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ViewMode;
    use nqr_processing::T2StarFit;
    use nqr_simulation::{FidConfig, FidSimulator};
    use tempfile::tempdir;

    fn controller() -> (MeasurementController, mpsc::Receiver<SpectrometerCommand>) {
        let (tx, rx) = mpsc::channel(32);
        (MeasurementController::new(tx), rx)
    }

    fn fid() -> Measurement {
        FidSimulator::new(FidConfig {
            points: 256,
            noise_std: 0.0,
            ..FidConfig::default()
        })
        .unwrap()
        .generate(1)
        .unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<SpectrometerCommand>) -> Vec<SpectrometerCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = rx.try_recv() {
            commands.push(command);
        }
        commands
    }

    #[test]
    fn test_inputs_enable_start() {
        let (mut controller, mut rx) = controller();
        assert!(!controller.start_measurement());

        controller.set_frequency(true, "83.56");
        assert!(!controller.model().start_enabled());
        controller.set_averages(true, "100");
        assert!(controller.model().start_enabled());
        assert!((controller.model().frequency_hz - 83.56e6).abs() < 1e-3);

        assert_eq!(
            drain(&mut rx),
            vec![
                SpectrometerCommand::SetFrequency("83.56".to_string()),
                SpectrometerCommand::SetAverages("100".to_string()),
            ]
        );

        controller.set_frequency(false, "83.56");
        assert!(!controller.model().start_enabled());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_unparsable_input_is_invalid() {
        let (mut controller, mut rx) = controller();
        controller.set_frequency(true, "abc");
        controller.set_averages(true, "0");
        assert!(!controller.model().frequency_valid);
        assert!(!controller.model().averages_valid);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_start_reemits_inputs() {
        let (mut controller, mut rx) = controller();
        controller.set_frequency(true, "90");
        controller.set_averages(true, "4");
        drain(&mut rx);

        assert!(controller.start_measurement());
        assert!(controller.model().is_measuring);
        assert_eq!(
            drain(&mut rx),
            vec![
                SpectrometerCommand::SetFrequency("90".to_string()),
                SpectrometerCommand::SetAverages("4".to_string()),
                SpectrometerCommand::StartMeasurement,
            ]
        );
    }

    #[test]
    fn test_start_not_delivered_leaves_idle() {
        let (mut controller, rx) = controller();
        let mut notifications = controller.subscribe_notifications();
        controller.set_frequency(true, "83.56");
        controller.set_averages(true, "10");
        drop(rx);

        assert!(!controller.start_measurement());
        assert!(!controller.model().is_measuring);
        assert_eq!(notifications.try_recv().unwrap().level, NotificationLevel::Error);
    }

    #[test]
    fn test_start_with_full_channel_leaves_idle() {
        let (tx, _rx) = mpsc::channel(1);
        let mut controller = MeasurementController::new(tx);
        controller.set_frequency(true, "83.56");
        controller.set_averages(true, "10");

        assert!(!controller.start_measurement());
        assert!(!controller.model().is_measuring);
    }

    #[test]
    fn test_data_only_accepted_while_measuring() {
        let (mut controller, _rx) = controller();
        controller.process_signal(SpectrometerEvent::MeasurementData(fid()));
        assert!(controller.model().measurements().is_empty());

        controller.set_frequency(true, "83.56");
        controller.set_averages(true, "1");
        controller.start_measurement();
        controller.process_signal(SpectrometerEvent::MeasurementData(fid()));

        assert!(!controller.model().is_measuring);
        assert_eq!(controller.model().measurements().len(), 1);
        assert!(controller.model().displayed_measurement().is_some());
    }

    #[test]
    fn test_error_notifies_while_measuring() {
        let (mut controller, _rx) = controller();
        let mut notifications = controller.subscribe_notifications();

        controller.process_signal(SpectrometerEvent::MeasurementError("ignored".to_string()));
        assert!(notifications.try_recv().is_err());

        controller.set_frequency(true, "83.56");
        controller.set_averages(true, "1");
        controller.start_measurement();
        controller.process_signal(SpectrometerEvent::MeasurementError("no signal".to_string()));

        assert!(!controller.model().is_measuring);
        assert_eq!(notifications.try_recv().unwrap(), Notification::error("no signal"));
    }

    #[test]
    fn test_failures_match_current_text() {
        let (mut controller, _rx) = controller();
        controller.set_frequency(true, "83.56");
        controller.set_averages(true, "10");

        controller.process_signal(SpectrometerEvent::FailureSetFrequency("90".to_string()));
        controller.process_signal(SpectrometerEvent::FailureSetAverages("5".to_string()));
        assert!(!controller.model().frequency_failed);
        assert!(!controller.model().averages_failed);

        controller.process_signal(SpectrometerEvent::FailureSetFrequency("83.56".to_string()));
        controller.process_signal(SpectrometerEvent::FailureSetAverages("10".to_string()));
        assert!(controller.model().frequency_failed);
        assert!(controller.model().averages_failed);

        // new input clears the flag
        controller.set_frequency(true, "84");
        assert!(!controller.model().frequency_failed);
    }

    #[test]
    fn test_spectrometer_label_and_view_mode() {
        let (mut controller, _rx) = controller();
        controller.process_signal(SpectrometerEvent::ActiveSpectrometerChanged("Simulator".to_string()));
        assert_eq!(controller.model().spectrometer_label, "Spectrometer: Simulator");

        controller.change_view_mode();
        assert_eq!(controller.model().view_mode, ViewMode::Fft);
        controller.change_view_mode();
        assert_eq!(controller.model().view_mode, ViewMode::Time);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fid.quack");

        let (mut controller, _rx) = controller();
        assert!(!controller.save_measurement(&path).unwrap());
        assert!(!path.exists());

        controller.model_mut().add_and_display(fid());
        assert!(controller.save_measurement(&path).unwrap());

        let (mut other, _rx) = self::controller();
        assert!(other.load_measurement(&path));
        assert_eq!(other.model().displayed_measurement().unwrap().len(), 256);
    }

    #[test]
    fn test_load_failures_notify() {
        let dir = tempdir().unwrap();
        let (mut controller, _rx) = controller();
        let mut notifications = controller.subscribe_notifications();

        assert!(!controller.load_measurement(dir.path().join("missing.quack")));
        assert_eq!(notifications.try_recv().unwrap().message, "File not found.");

        let bad = dir.path().join("bad.quack");
        std::fs::write(&bad, "not json").unwrap();
        assert!(!controller.load_measurement(&bad));
        assert_eq!(
            notifications.try_recv().unwrap().message,
            "File is not a valid measurement file."
        );
        assert!(controller.model().measurements().is_empty());
    }

    #[test]
    fn test_apodize_displayed() {
        let (mut controller, _rx) = controller();
        let mut notifications = controller.subscribe_notifications();

        assert!(!controller.apodize(&Function::fid()));
        assert_eq!(notifications.try_recv().unwrap().message, "No measurement to apodize.");

        controller.model_mut().add_and_display(fid());
        assert!(controller.apodize(&Function::fid()));
        assert_eq!(controller.model().measurements().len(), 2);

        let model = controller.model();
        let original = &model.measurements()[0];
        let apodized = model.displayed_measurement().unwrap();
        assert!(apodized.tdy()[200].norm() < original.tdy()[200].norm());
    }

    #[test]
    fn test_fit_attaches_to_displayed() {
        let (mut controller, _rx) = controller();
        assert!(!controller.fit(&T2StarFit));

        controller.model_mut().add_and_display(fid());
        assert!(controller.fit(&T2StarFit));

        let record = controller.model().displayed_measurement().unwrap().fit("T2*").unwrap();
        let t2 = record.parameters[1].value;
        assert!((t2 - 50.0).abs() < 0.5, "T2* = {}", t2);
    }
}
