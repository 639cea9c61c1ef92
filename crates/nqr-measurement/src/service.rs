//! Measurement service: runs the controller against a spectrometer backend

use crate::controller::{MeasurementController, Notification};
use nqr_core::{Measurement, NqrResult};
use nqr_processing::{model_by_name, Function};
use nqr_simulation::{start_spectrometer, SpectrometerCommand, SpectrometerConfig, SpectrometerEvent};
use std::path::PathBuf;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Operator actions accepted by the service
#[derive(Debug, Clone)]
pub enum ModuleCommand {
    SetFrequency { valid: bool, text: String },
    SetAverages { valid: bool, text: String },
    StartMeasurement,
    ChangeViewMode,
    Save(PathBuf),
    Load(PathBuf),
    Apodize(Function),
    /// Fit the model with this name to the displayed measurement
    Fit(String),
    Shutdown,
}

/// Updates published for front ends
#[derive(Debug, Clone)]
pub enum ModuleUpdate {
    /// A measurement was added to the history and displayed
    Displayed(Measurement),
    Notification(Notification),
    SpectrometerLabel(String),
}

/// Async loop joining operator commands and spectrometer events
pub struct MeasurementService {
    controller: MeasurementController,
    events: broadcast::Receiver<SpectrometerEvent>,
    notifications: broadcast::Receiver<Notification>,
    update_sender: broadcast::Sender<ModuleUpdate>,
    command_receiver: mpsc::Receiver<ModuleCommand>,
    command_sender: mpsc::Sender<ModuleCommand>,
}

impl MeasurementService {
    pub fn new(
        events: broadcast::Receiver<SpectrometerEvent>,
        spectrometer_commands: mpsc::Sender<SpectrometerCommand>,
    ) -> Self {
        let controller = MeasurementController::new(spectrometer_commands);
        let notifications = controller.subscribe_notifications();
        let (update_sender, _) = broadcast::channel(32);
        let (command_sender, command_receiver) = mpsc::channel(32);

        MeasurementService {
            controller,
            events,
            notifications,
            update_sender,
            command_receiver,
            command_sender,
        }
    }

    /// Get a receiver for module updates
    pub fn subscribe(&self) -> broadcast::Receiver<ModuleUpdate> {
        self.update_sender.subscribe()
    }

    /// Get a sender for operator commands
    pub fn command_handle(&self) -> mpsc::Sender<ModuleCommand> {
        self.command_sender.clone()
    }

    /// Run until `Shutdown` or until every command sender is dropped
    ///
    /// Returns the controller so the final state can be inspected.
    pub async fn run(mut self) -> MeasurementController {
        info!("Measurement service started");
        drop(std::mem::replace(&mut self.command_sender, mpsc::channel(1).0));
        let mut backend_alive = true;

        loop {
            tokio::select! {
                event = self.events.recv(), if backend_alive => {
                    match event {
                        Ok(event) => self.handle_event(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Measurement service lagged, skipped {} spectrometer events", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("Spectrometer event channel closed");
                            backend_alive = false;
                        }
                    }
                }

                command = self.command_receiver.recv() => {
                    match command {
                        Some(ModuleCommand::Shutdown) | None => {
                            debug!("Measurement service stopping");
                            break;
                        }
                        Some(command) => self.handle_command(command),
                    }
                }
            }

            self.forward_notifications();
        }

        info!("Measurement service stopped");
        self.controller
    }

    fn handle_event(&mut self, event: SpectrometerEvent) {
        let displayed_before = self.displayed_count();
        let label_changed = matches!(event, SpectrometerEvent::ActiveSpectrometerChanged(_));

        self.controller.process_signal(event);

        if label_changed {
            let label = self.controller.model().spectrometer_label.clone();
            self.publish(ModuleUpdate::SpectrometerLabel(label));
        }
        self.publish_displayed_if_new(displayed_before);
    }

    fn handle_command(&mut self, command: ModuleCommand) {
        let displayed_before = self.displayed_count();

        match command {
            ModuleCommand::SetFrequency { valid, text } => self.controller.set_frequency(valid, &text),
            ModuleCommand::SetAverages { valid, text } => self.controller.set_averages(valid, &text),
            ModuleCommand::StartMeasurement => {
                self.controller.start_measurement();
            }
            ModuleCommand::ChangeViewMode => self.controller.change_view_mode(),
            ModuleCommand::Save(path) => match self.controller.save_measurement(&path) {
                Ok(true) => self.publish(ModuleUpdate::Notification(Notification::info(format!(
                    "Saved to {}",
                    path.display()
                )))),
                Ok(false) => {}
                Err(e) => {
                    warn!("Save failed: {}", e);
                    self.publish(ModuleUpdate::Notification(Notification::error(e.to_string())));
                }
            },
            ModuleCommand::Load(path) => {
                self.controller.load_measurement(&path);
            }
            ModuleCommand::Apodize(function) => {
                self.controller.apodize(&function);
            }
            ModuleCommand::Fit(name) => match model_by_name(&name) {
                Some(model) => {
                    if self.controller.fit(model.as_ref()) {
                        self.publish_displayed();
                    }
                }
                None => self.publish(ModuleUpdate::Notification(Notification::error(format!(
                    "Unknown fit model '{}'",
                    name
                )))),
            },
            ModuleCommand::Shutdown => {}
        }

        self.publish_displayed_if_new(displayed_before);
    }

    fn displayed_count(&self) -> usize {
        self.controller.model().measurements().len()
    }

    fn publish_displayed_if_new(&self, count_before: usize) {
        if self.displayed_count() > count_before {
            self.publish_displayed();
        }
    }

    fn publish_displayed(&self) {
        if let Some(measurement) = self.controller.model().displayed_measurement() {
            self.publish(ModuleUpdate::Displayed(measurement.clone()));
        }
    }

    fn forward_notifications(&mut self) {
        while let Ok(notification) = self.notifications.try_recv() {
            self.publish(ModuleUpdate::Notification(notification));
        }
    }

    fn publish(&self, update: ModuleUpdate) {
        if self.update_sender.send(update).is_err() {
            debug!("No subscribers for module update");
        }
    }
}

/// Start a simulated spectrometer and a measurement service bound to it
pub fn start_measurement_service(
    config: SpectrometerConfig,
) -> NqrResult<(
    broadcast::Receiver<ModuleUpdate>,
    mpsc::Sender<ModuleCommand>,
    JoinHandle<MeasurementController>,
)> {
    let (events, spectrometer_commands, _backend) = start_spectrometer(config)?;

    let service = MeasurementService::new(events, spectrometer_commands);
    let updates = service.subscribe();
    let commands = service.command_handle();

    // the backend stops once the service drops its command sender
    let handle = tokio::spawn(service.run());

    Ok((updates, commands, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nqr_simulation::FidConfig;
    use tokio::time::{timeout, Duration};

    fn config() -> SpectrometerConfig {
        SpectrometerConfig {
            fid: FidConfig {
                points: 256,
                noise_std: 0.0,
                seed: Some(11),
                ..FidConfig::default()
            },
            ..SpectrometerConfig::default()
        }
    }

    async fn wait_for<F>(updates: &mut broadcast::Receiver<ModuleUpdate>, mut pred: F) -> ModuleUpdate
    where
        F: FnMut(&ModuleUpdate) -> bool,
    {
        timeout(Duration::from_secs(5), async {
            loop {
                let update = updates.recv().await.expect("update channel closed");
                if pred(&update) {
                    return update;
                }
            }
        })
        .await
        .expect("timed out waiting for update")
    }

    #[tokio::test]
    async fn test_acquire_through_service() {
        let (mut updates, commands, handle) = start_measurement_service(config()).unwrap();

        commands
            .send(ModuleCommand::SetFrequency { valid: true, text: "83.56".to_string() })
            .await
            .unwrap();
        commands
            .send(ModuleCommand::SetAverages { valid: true, text: "2".to_string() })
            .await
            .unwrap();
        commands.send(ModuleCommand::StartMeasurement).await.unwrap();

        match wait_for(&mut updates, |u| matches!(u, ModuleUpdate::Displayed(_))).await {
            ModuleUpdate::Displayed(m) => assert_eq!(m.len(), 256),
            other => panic!("unexpected update {:?}", other),
        }

        commands.send(ModuleCommand::Fit("T2*".to_string())).await.unwrap();
        match wait_for(&mut updates, |u| matches!(u, ModuleUpdate::Displayed(_))).await {
            ModuleUpdate::Displayed(m) => assert!(m.fit("T2*").is_some()),
            other => panic!("unexpected update {:?}", other),
        }

        commands.send(ModuleCommand::Shutdown).await.unwrap();
        let controller = handle.await.unwrap();
        assert_eq!(controller.model().measurements().len(), 1);
        assert_eq!(controller.model().spectrometer_label, "Spectrometer: Simulator");
    }

    #[tokio::test]
    async fn test_notifications_forwarded() {
        let (mut updates, commands, handle) = start_measurement_service(config()).unwrap();

        commands.send(ModuleCommand::Apodize(Function::fid())).await.unwrap();
        match wait_for(&mut updates, |u| matches!(u, ModuleUpdate::Notification(_))).await {
            ModuleUpdate::Notification(n) => assert_eq!(n.message, "No measurement to apodize."),
            other => panic!("unexpected update {:?}", other),
        }

        commands.send(ModuleCommand::Fit("gaussian".to_string())).await.unwrap();
        match wait_for(&mut updates, |u| matches!(u, ModuleUpdate::Notification(_))).await {
            ModuleUpdate::Notification(n) => assert!(n.message.contains("gaussian")),
            other => panic!("unexpected update {:?}", other),
        }

        drop(commands);
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("service did not stop")
            .unwrap();
    }
}
