//! Least-squares fitting of decay and line-shape models
//!
//! Models are fitted to the magnitude of either the time-domain signal or
//! the spectrum with a Levenberg-Marquardt iteration on the normal
//! equations. The Jacobian is taken numerically so a model only has to
//! provide its value and a starting point.

use crate::processor::{MeasurementProcessor, ProcessingMetrics, ProcessorConfig, ProcessorType};
use nalgebra::{DMatrix, DVector};
use nqr_core::{config_error, FitDomain, FitParameter, FitRecord, Measurement, NqrError, NqrResult};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, info, warn};

/// Model function with named parameters
pub trait FitModel: Send + Sync {
    /// Name stored in the resulting [`FitRecord`]
    fn name(&self) -> &str;

    /// Representation the model is fitted to
    fn domain(&self) -> FitDomain;

    /// Parameter names, in the order of the parameter vector
    fn parameter_names(&self) -> &[&'static str];

    /// Model value at `x`
    fn evaluate(&self, x: f64, params: &[f64]) -> f64;

    /// Starting point for the iteration
    fn initial_guess(&self, x: &[f64], y: &[f64]) -> Vec<f64>;

    /// Abscissa and ordinate the model is fitted to
    fn data(&self, measurement: &Measurement) -> (Vec<f64>, Vec<f64>) {
        match self.domain() {
            FitDomain::Time => (measurement.tdx().to_vec(), measurement.time_magnitude()),
            FitDomain::Frequency => (measurement.fdx().to_vec(), measurement.frequency_magnitude()),
        }
    }
}

/// `S0 * exp(-t / T2star) + c` on the time-domain magnitude
#[derive(Debug, Clone, Copy, Default)]
pub struct T2StarFit;

impl FitModel for T2StarFit {
    fn name(&self) -> &str {
        "T2*"
    }

    fn domain(&self) -> FitDomain {
        FitDomain::Time
    }

    fn parameter_names(&self) -> &[&'static str] {
        &["S0", "T2star", "c"]
    }

    fn evaluate(&self, t: f64, p: &[f64]) -> f64 {
        p[0] * (-t / p[1]).exp() + p[2]
    }

    fn initial_guess(&self, x: &[f64], y: &[f64]) -> Vec<f64> {
        let c = y.iter().copied().fold(f64::INFINITY, f64::min);
        let s0 = y[0] - c;
        let threshold = s0 / std::f64::consts::E;

        // first time the decay falls below 1/e of its start
        let t2 = x
            .iter()
            .zip(y)
            .find(|(_, &v)| v - c < threshold)
            .map(|(&t, _)| t - x[0])
            .filter(|&t| t > 0.0)
            .unwrap_or((x[x.len() - 1] - x[0]) / 3.0);

        vec![s0, t2, c]
    }
}

/// `S0 / (1 + ((f - f0) * pi * T2star)^2) + c` on the spectrum magnitude
///
/// `f` is in MHz and `T2star` in microseconds, so the product is unitless
/// and the half width at half maximum is `1 / (pi * T2star)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LorentzianFit;

impl FitModel for LorentzianFit {
    fn name(&self) -> &str {
        "Lorentzian"
    }

    fn domain(&self) -> FitDomain {
        FitDomain::Frequency
    }

    fn parameter_names(&self) -> &[&'static str] {
        &["S0", "f0", "T2star", "c"]
    }

    fn evaluate(&self, f: f64, p: &[f64]) -> f64 {
        p[0] / (1.0 + ((f - p[1]) * PI * p[2]).powi(2)) + p[3]
    }

    fn initial_guess(&self, x: &[f64], y: &[f64]) -> Vec<f64> {
        let c = y.iter().copied().fold(f64::INFINITY, f64::min);
        let (peak, max) = y
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |acc, (i, v)| if v > acc.1 { (i, v) } else { acc });
        let half = c + (max - c) / 2.0;

        let left = (0..peak).rev().find(|&i| y[i] < half).unwrap_or(0);
        let right = (peak..y.len()).find(|&i| y[i] < half).unwrap_or(y.len() - 1);
        let fwhm = (x[right] - x[left]).abs();
        let fallback = (x[x.len() - 1] - x[0]).abs() / 10.0;
        let width = if fwhm > 0.0 { fwhm } else { fallback };

        vec![max - c, x[peak], 2.0 / (PI * width), c]
    }
}

/// Look up a built-in model by name
pub fn model_by_name(name: &str) -> Option<Box<dyn FitModel>> {
    match name.to_ascii_lowercase().as_str() {
        "t2*" | "t2star" => Some(Box::new(T2StarFit)),
        "lorentzian" => Some(Box::new(LorentzianFit)),
        _ => None,
    }
}

/// Stopping criteria for the Levenberg-Marquardt iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitOptions {
    pub max_iterations: usize,
    /// Relative change in the residual sum of squares treated as converged
    pub tolerance: f64,
    pub initial_damping: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            max_iterations: 200,
            tolerance: 1e-12,
            initial_damping: 1e-3,
        }
    }
}

/// Fit `model` to `measurement` with default options
pub fn fit(measurement: &Measurement, model: &dyn FitModel) -> NqrResult<FitRecord> {
    fit_with_options(measurement, model, &FitOptions::default())
}

/// Fit `model` to `measurement`
pub fn fit_with_options(
    measurement: &Measurement,
    model: &dyn FitModel,
    options: &FitOptions,
) -> NqrResult<FitRecord> {
    let (x, y) = model.data(measurement);
    let solution = least_squares(model, &x, &y, options)?;

    info!(
        "Fitted {} to '{}' in {} iterations (SSR {:.3e})",
        model.name(), measurement.name, solution.iterations, solution.ssr
    );

    let curve = x.iter().map(|&xi| model.evaluate(xi, &solution.params)).collect();
    let parameters = model
        .parameter_names()
        .iter()
        .zip(&solution.params)
        .map(|(name, &value)| FitParameter { name: name.to_string(), value })
        .collect();
    let covariance = (0..solution.covariance.nrows())
        .map(|i| solution.covariance.row(i).iter().copied().collect())
        .collect();

    Ok(FitRecord {
        name: model.name().to_string(),
        domain: model.domain(),
        parameters,
        covariance,
        x,
        y: curve,
    })
}

struct Solution {
    params: Vec<f64>,
    covariance: DMatrix<f64>,
    ssr: f64,
    iterations: usize,
}

fn least_squares(model: &dyn FitModel, x: &[f64], y: &[f64], options: &FitOptions) -> NqrResult<Solution> {
    let failed = |reason: String| NqrError::FitFailed { model: model.name().to_string(), reason };

    let n = x.len();
    let m = model.parameter_names().len();
    if n <= m {
        return Err(failed(format!("{} points cannot determine {} parameters", n, m)));
    }

    let mut params = model.initial_guess(x, y);
    if params.len() != m || params.iter().any(|p| !p.is_finite()) {
        return Err(failed(format!("unusable initial guess {:?}", params)));
    }

    let mut r = residuals(model, x, y, &params);
    let mut ssr = r.norm_squared();
    let mut lambda = options.initial_damping;
    let mut iterations = 0;

    while iterations < options.max_iterations && ssr > 0.0 {
        iterations += 1;

        let j = jacobian(model, x, &params);
        let jt = j.transpose();
        let normal = &jt * &j;
        let gradient = &jt * &r;

        let mut improved = false;
        while lambda < 1e16 {
            let mut damped = normal.clone();
            for i in 0..m {
                damped[(i, i)] += lambda * normal[(i, i)].max(1e-12);
            }

            let Some(step) = solve(damped, &gradient) else {
                lambda *= 10.0;
                continue;
            };

            let candidate: Vec<f64> = params.iter().zip(step.iter()).map(|(p, d)| p + d).collect();
            let candidate_residuals = residuals(model, x, y, &candidate);
            let candidate_ssr = candidate_residuals.norm_squared();

            if candidate_ssr.is_finite() && candidate_ssr < ssr {
                let relative = (ssr - candidate_ssr) / ssr;
                params = candidate;
                r = candidate_residuals;
                ssr = candidate_ssr;
                lambda = (lambda / 10.0).max(1e-15);
                improved = relative > options.tolerance;
                break;
            }
            lambda *= 10.0;
        }

        if !improved {
            break;
        }
    }

    debug!("{}: stopped after {} iterations, lambda {:.1e}", model.name(), iterations, lambda);

    let j = jacobian(model, x, &params);
    let normal = j.transpose() * &j;
    let inverse = normal
        .try_inverse()
        .ok_or_else(|| failed("singular normal matrix".to_string()))?;
    let covariance = inverse * (ssr / (n - m) as f64);

    if params.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
        return Err(failed("result is not finite".to_string()));
    }

    Ok(Solution { params, covariance, ssr, iterations })
}

fn residuals(model: &dyn FitModel, x: &[f64], y: &[f64], params: &[f64]) -> DVector<f64> {
    DVector::from_iterator(x.len(), x.iter().zip(y).map(|(&xi, &yi)| yi - model.evaluate(xi, params)))
}

/// Central-difference Jacobian of the model with respect to the parameters
fn jacobian(model: &dyn FitModel, x: &[f64], params: &[f64]) -> DMatrix<f64> {
    let mut jacobian = DMatrix::zeros(x.len(), params.len());
    let mut shifted = params.to_vec();

    for j in 0..params.len() {
        let h = 1e-6 * params[j].abs().max(1.0);

        shifted[j] = params[j] + h;
        let upper: Vec<f64> = x.iter().map(|&xi| model.evaluate(xi, &shifted)).collect();
        shifted[j] = params[j] - h;
        let lower: Vec<f64> = x.iter().map(|&xi| model.evaluate(xi, &shifted)).collect();
        shifted[j] = params[j];

        for i in 0..x.len() {
            jacobian[(i, j)] = (upper[i] - lower[i]) / (2.0 * h);
        }
    }

    jacobian
}

fn solve(matrix: DMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    let step = match matrix.clone().cholesky() {
        Some(cholesky) => cholesky.solve(rhs),
        None => matrix.lu().solve(rhs)?,
    };
    step.iter().all(|v| v.is_finite()).then_some(step)
}

/// Processor attaching a fit to each measurement it sees
pub struct Fitter {
    config: ProcessorConfig,
    model: Box<dyn FitModel>,
    options: FitOptions,
}

impl Fitter {
    pub fn new(name: &str, model: Box<dyn FitModel>) -> Self {
        let mut config = ProcessorConfig::new(name, ProcessorType::Fit);
        config.set_parameter("model", model.name().into());

        Fitter {
            config,
            model,
            options: FitOptions::default(),
        }
    }

    /// Build from a stored configuration (`model`, optional `max_iterations`)
    pub fn from_config(config: ProcessorConfig) -> NqrResult<Self> {
        let mut fitter = Fitter::new(&config.name, Box::new(T2StarFit));
        fitter.update_config(config)?;
        Ok(fitter)
    }

    pub fn model(&self) -> &dyn FitModel {
        self.model.as_ref()
    }
}

impl MeasurementProcessor for Fitter {
    fn process(&mut self, input: &Measurement) -> NqrResult<Measurement> {
        let timer = ProcessingMetrics::start_timing(&self.config.name);

        match fit_with_options(input, self.model.as_ref(), &self.options) {
            Ok(record) => {
                let mut output = input.clone();
                output.add_fit(record);
                let metrics = timer.finish();
                debug!("{} took {}us", metrics.processor, metrics.processing_time_us);
                Ok(output)
            }
            Err(e) => {
                warn!("Fitter '{}' failed: {}", self.config.name, e);
                timer.finish_with_error(&e.to_string());
                Err(e)
            }
        }
    }

    fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    fn update_config(&mut self, config: ProcessorConfig) -> NqrResult<()> {
        config.validate()?;

        let name = config.get_str("model").unwrap_or("T2*");
        self.model = model_by_name(name)
            .ok_or_else(|| config_error!("processor '{}': unknown fit model '{}'", config.name, name))?;

        let iterations = config.get_float("max_iterations", FitOptions::default().max_iterations as f64);
        if iterations < 1.0 {
            return Err(config_error!("processor '{}': max_iterations must be at least 1", config.name));
        }
        self.options.max_iterations = iterations as usize;

        self.config = config;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn can_process(&self, measurement: &Measurement) -> bool {
        measurement.len() > self.model.parameter_names().len()
    }

    fn processor_type(&self) -> ProcessorType {
        ProcessorType::Fit
    }
}
