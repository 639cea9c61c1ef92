//! State of the measurement module

use nqr_core::{AcquisitionSettings, Complex, FitDomain, Measurement};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Which representation of the displayed measurement is plotted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ViewMode {
    #[default]
    Time,
    Fft,
}

impl ViewMode {
    pub fn toggled(self) -> Self {
        match self {
            ViewMode::Time => ViewMode::Fft,
            ViewMode::Fft => ViewMode::Time,
        }
    }
}

/// Measurement history plus acquisition inputs and view state
#[derive(Debug, Clone)]
pub struct MeasurementModel {
    measurements: Vec<Measurement>,
    displayed: Option<usize>,
    pub view_mode: ViewMode,

    /// Frequency in Hz from the last valid input
    pub frequency_hz: f64,
    /// Frequency input as typed, in MHz
    pub frequency_text: String,
    pub frequency_valid: bool,
    /// Backend rejected the current frequency input
    pub frequency_failed: bool,

    pub averages: u32,
    pub averages_text: String,
    pub averages_valid: bool,
    /// Backend rejected the current averages input
    pub averages_failed: bool,

    pub spectrometer_label: String,
    /// A measurement has been started and no result has arrived yet
    pub is_measuring: bool,
}

impl Default for MeasurementModel {
    fn default() -> Self {
        let settings = AcquisitionSettings::default();
        Self {
            measurements: Vec::new(),
            displayed: None,
            view_mode: ViewMode::Time,
            frequency_hz: settings.frequency_hz,
            frequency_text: String::new(),
            frequency_valid: false,
            frequency_failed: false,
            averages: settings.averages,
            averages_text: String::new(),
            averages_valid: false,
            averages_failed: false,
            spectrometer_label: "Spectrometer: None".to_string(),
            is_measuring: false,
        }
    }
}

impl MeasurementModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the history
    pub fn add_measurement(&mut self, measurement: Measurement) {
        self.measurements.push(measurement);
    }

    /// Append to the history and show it
    pub fn add_and_display(&mut self, measurement: Measurement) {
        self.add_measurement(measurement);
        self.displayed = Some(self.measurements.len() - 1);
    }

    /// Show an entry of the history
    pub fn display(&mut self, index: usize) -> bool {
        if index < self.measurements.len() {
            self.displayed = Some(index);
            true
        } else {
            false
        }
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Most recent measurement
    pub fn last_measurement(&self) -> Option<&Measurement> {
        self.measurements.last()
    }

    pub fn displayed_measurement(&self) -> Option<&Measurement> {
        self.displayed.and_then(|i| self.measurements.get(i))
    }

    pub fn displayed_measurement_mut(&mut self) -> Option<&mut Measurement> {
        self.displayed.and_then(move |i| self.measurements.get_mut(i))
    }

    /// Both acquisition inputs are valid
    pub fn start_enabled(&self) -> bool {
        self.frequency_valid && self.averages_valid
    }

    /// Settings that would be sent with the next start
    pub fn settings(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            frequency_hz: self.frequency_hz,
            averages: self.averages,
        }
    }

    /// Plot series of the displayed measurement in the current view
    pub fn plot_data(&self) -> Option<PlotData> {
        self.displayed_measurement()
            .map(|m| PlotData::from_measurement(m, self.view_mode))
    }
}

/// Model curve of a fit in the plotted domain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitCurve {
    pub name: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// Series for plotting one representation of a measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotData {
    pub title: String,
    pub x_label: &'static str,
    pub y_label: &'static str,
    pub x: Vec<f64>,
    pub real: Vec<f64>,
    pub imaginary: Vec<f64>,
    pub magnitude: Vec<f64>,
    pub fits: Vec<FitCurve>,
}

impl PlotData {
    pub fn from_measurement(measurement: &Measurement, view_mode: ViewMode) -> Self {
        let (x, y, domain, x_label, title) = match view_mode {
            ViewMode::Time => (
                measurement.tdx(),
                measurement.tdy(),
                FitDomain::Time,
                "Time (µs)",
                "Measurement data - Time domain",
            ),
            ViewMode::Fft => (
                measurement.fdx(),
                measurement.fdy(),
                FitDomain::Frequency,
                "Frequency (MHz)",
                "Measurement data - Frequency domain",
            ),
        };

        let fits = measurement
            .fits()
            .iter()
            .filter(|f| f.domain == domain)
            .map(|f| FitCurve {
                name: f.name.clone(),
                x: f.x.clone(),
                y: f.y.clone(),
            })
            .collect();

        PlotData {
            title: title.to_string(),
            x_label,
            y_label: "Amplitude (a.u.)",
            x: x.to_vec(),
            real: y.iter().map(|c| c.re).collect(),
            imaginary: y.iter().map(|c| c.im).collect(),
            magnitude: y.iter().map(|c| c.norm()).collect(),
            fits,
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Comma separated columns x, real, imaginary, magnitude
    pub fn to_csv(&self) -> String {
        let mut csv = format!("{},real,imaginary,magnitude\n", self.x_label);
        for i in 0..self.x.len() {
            // writing to a String cannot fail
            let _ = writeln!(
                csv,
                "{},{},{},{}",
                self.x[i], self.real[i], self.imaginary[i], self.magnitude[i]
            );
        }
        csv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nqr_core::{FitParameter, FitRecord};

    fn measurement(name: &str) -> Measurement {
        let tdx = vec![0.0, 1.0, 2.0, 3.0];
        let tdy = vec![
            Complex::new(1.0, 0.0),
            Complex::new(0.0, 0.5),
            Complex::new(-0.25, 0.0),
            Complex::new(0.0, -0.125),
        ];
        Measurement::new(name, tdx, tdy, 83.56e6).unwrap()
    }

    #[test]
    fn test_defaults() {
        let model = MeasurementModel::new();
        assert_eq!(model.view_mode, ViewMode::Time);
        assert!(!model.start_enabled());
        assert!(model.displayed_measurement().is_none());
        assert!(model.plot_data().is_none());
        assert_eq!(model.spectrometer_label, "Spectrometer: None");
    }

    #[test]
    fn test_history_and_display() {
        let mut model = MeasurementModel::new();
        model.add_measurement(measurement("a"));
        assert!(model.displayed_measurement().is_none());

        model.add_and_display(measurement("b"));
        assert_eq!(model.displayed_measurement().unwrap().name, "b");
        assert_eq!(model.last_measurement().unwrap().name, "b");

        assert!(model.display(0));
        assert_eq!(model.displayed_measurement().unwrap().name, "a");
        assert!(!model.display(5));
        assert_eq!(model.measurements().len(), 2);
    }

    #[test]
    fn test_plot_data_views() {
        let mut model = MeasurementModel::new();
        model.add_and_display(measurement("fid"));

        let time = model.plot_data().unwrap();
        assert_eq!(time.x_label, "Time (µs)");
        assert_eq!(time.x, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(time.imaginary[1], 0.5);
        assert_eq!(time.magnitude[2], 0.25);

        model.view_mode = model.view_mode.toggled();
        let fft = model.plot_data().unwrap();
        assert_eq!(fft.x_label, "Frequency (MHz)");
        assert_eq!(fft.len(), 4);
        assert_eq!(fft.title, "Measurement data - Frequency domain");
    }

    #[test]
    fn test_plot_data_fit_curves_follow_domain() {
        let mut m = measurement("fid");
        m.add_fit(FitRecord {
            name: "T2*".to_string(),
            domain: FitDomain::Time,
            parameters: vec![FitParameter { name: "T2star".to_string(), value: 1.0 }],
            covariance: vec![vec![0.0]],
            x: vec![0.0, 1.0],
            y: vec![1.0, 0.5],
        });

        assert_eq!(PlotData::from_measurement(&m, ViewMode::Time).fits.len(), 1);
        assert!(PlotData::from_measurement(&m, ViewMode::Fft).fits.is_empty());
    }

    #[test]
    fn test_csv() {
        let csv = PlotData::from_measurement(&measurement("fid"), ViewMode::Time).to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "Time (µs),real,imaginary,magnitude");
        assert_eq!(lines[1], "0,1,0,1");
    }
}
