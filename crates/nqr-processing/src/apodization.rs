//! Apodization: weighting the time-domain signal with a window function

use crate::functions::{Function, FunctionKind};
use crate::processor::{
    MeasurementProcessor, ParameterValue, ProcessingMetrics, ProcessorConfig, ProcessorType,
};
use nqr_core::{config_error, Measurement, NqrResult};
use tracing::{debug, warn};

/// Multiply the samples of `measurement` by `function` and return the result
///
/// The function interval is mapped linearly onto the sample indices, so the
/// first sample is weighted with `f(start_x)` and the last with `f(end_x)`.
/// The returned measurement keeps name and frequencies but carries no fits.
pub fn apodize(measurement: &Measurement, function: &Function) -> NqrResult<Measurement> {
    let weights = function.sample(measurement.len())?;

    let tdy = measurement
        .tdy()
        .iter()
        .zip(&weights)
        .map(|(sample, w)| *sample * *w)
        .collect();

    debug!("Apodized '{}' ({} samples) with {}", measurement.name, measurement.len(), function);
    measurement.derive(tdy)
}

const RESERVED_KEYS: [&str; 5] = ["function", "expression", "span_time_axis", "start_x", "end_x"];

/// Processor wrapping [`apodize`]
///
/// Recognised config parameters: `function` (display name), `expression`
/// (custom functions), `span_time_axis` and one float per parameter symbol.
pub struct Apodizer {
    config: ProcessorConfig,
    function: Function,
    span_time_axis: bool,
}

impl Apodizer {
    pub fn new(name: &str, function: Function) -> Self {
        let mut config = ProcessorConfig::new(name, ProcessorType::Apodization);
        config.set_parameter("function", function.name().into());
        if let FunctionKind::Custom { expression } = &function.kind {
            config.set_parameter("expression", expression.as_str().into());
        }
        for param in &function.parameters {
            config.set_parameter(&param.symbol, param.value.into());
        }

        Apodizer {
            config,
            function,
            span_time_axis: false,
        }
    }

    /// Build from a stored processor configuration
    pub fn from_config(config: ProcessorConfig) -> NqrResult<Self> {
        let mut apodizer = Apodizer::new(&config.name, Function::fid());
        apodizer.update_config(config)?;
        Ok(apodizer)
    }

    /// Evaluate the window over each measurement's own time axis
    pub fn with_time_axis(mut self) -> Self {
        self.span_time_axis = true;
        self.config.set_parameter("span_time_axis", true.into());
        self
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    fn function_from_config(config: &ProcessorConfig) -> NqrResult<Function> {
        let name = config.get_str("function").unwrap_or("FID");

        let mut function = if name.eq_ignore_ascii_case("custom") {
            let expression = config.get_str("expression").ok_or_else(|| {
                config_error!("processor '{}': custom function needs an expression", config.name)
            })?;
            Function::custom(expression)?
        } else {
            Function::by_name(name).ok_or_else(|| {
                config_error!("processor '{}': unknown function '{}'", config.name, name)
            })?
        };

        for (key, value) in &config.parameters {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            let ParameterValue::Float(v) = value else { continue };
            if function.parameter(key).is_some() {
                function.set_parameter(key, *v)?;
            } else if let FunctionKind::Custom { .. } = function.kind {
                function.add_parameter(key, key, *v)?;
            }
        }

        let start = config.get_float("start_x", function.start_x);
        let end = config.get_float("end_x", function.end_x);
        function.set_interval(start, end)?;

        Ok(function)
    }
}

impl MeasurementProcessor for Apodizer {
    fn process(&mut self, input: &Measurement) -> NqrResult<Measurement> {
        let timer = ProcessingMetrics::start_timing(&self.config.name);

        let result = if self.span_time_axis {
            let mut function = self.function.clone();
            function
                .span_time_axis(input.duration_us())
                .and_then(|_| apodize(input, &function))
        } else {
            apodize(input, &self.function)
        };

        let metrics = match &result {
            Ok(_) => timer.finish(),
            Err(e) => {
                warn!("Apodizer '{}' failed: {}", self.config.name, e);
                timer.finish_with_error(&e.to_string())
            }
        };
        debug!("{} took {}us", metrics.processor, metrics.processing_time_us);

        result
    }

    fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    fn update_config(&mut self, config: ProcessorConfig) -> NqrResult<()> {
        config.validate()?;
        self.function = Self::function_from_config(&config)?;
        self.span_time_axis = config.get_bool("span_time_axis", false);
        self.config = config;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn processor_type(&self) -> ProcessorType {
        ProcessorType::Apodization
    }
}
