//! Processing pipeline for chaining measurement processors

use crate::apodization::Apodizer;
use crate::fitting::{Fitter, FitModel, LorentzianFit, T2StarFit};
use crate::functions::Function;
use crate::processor::{MeasurementProcessor, ProcessingMetrics, ProcessorConfig, ProcessorType};
use nqr_core::{config_error, Measurement, NqrResult};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

/// Processing pipeline that chains multiple processors
pub struct Pipeline {
    processors: Vec<Box<dyn MeasurementProcessor>>,
    processing_metrics: Vec<ProcessingMetrics>,
    bypass_enabled: bool,
    name: String,
}

/// Pipeline builder for constructing processing chains
pub struct PipelineBuilder {
    processors: Vec<Box<dyn MeasurementProcessor>>,
    name: String,
    bypass_enabled: bool,
}

/// Pipeline execution result with per-processor metrics
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub output: Measurement,
    pub processing_metrics: Vec<ProcessingMetrics>,
    pub total_latency_us: u64,
    pub warnings: Vec<String>,
}

/// Summary of the last pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelinePerformance {
    pub total_latency_us: u64,
    pub success_rate: f32,
    pub processor_count: usize,
}

impl PipelineResult {
    /// True when no processor failed
    pub fn success(&self) -> bool {
        self.processing_metrics.iter().all(|m| m.success)
    }
}

impl Pipeline {
    /// Create new empty pipeline
    pub fn new(name: &str) -> Self {
        Pipeline {
            processors: Vec::new(),
            processing_metrics: Vec::new(),
            bypass_enabled: false,
            name: name.to_string(),
        }
    }

    /// Add processor to pipeline
    pub fn add_processor(&mut self, processor: Box<dyn MeasurementProcessor>) {
        self.processors.push(processor);
    }

    /// Exponential apodization over the acquisition window followed by a T2* fit
    pub fn fid_apodization(t2star_us: f64) -> NqrResult<Self> {
        let mut function = Function::fid();
        function.set_parameter("T2star", t2star_us)?;

        let mut builder = PipelineBuilder::new("FID apodization");
        builder
            .add_apodization(Apodizer::new("fid_window", function).with_time_axis())
            .add_fit("t2star", T2StarFit);
        Ok(builder.build())
    }

    /// T2* from the time signal and line width from the spectrum
    pub fn t2star_analysis() -> Self {
        let mut builder = PipelineBuilder::new("T2* analysis");
        builder
            .set_bypass_enabled(true)
            .add_fit("t2star", T2StarFit)
            .add_fit("linewidth", LorentzianFit);
        builder.build()
    }

    /// Process a measurement through the entire pipeline
    pub fn process(&mut self, input: &Measurement) -> NqrResult<PipelineResult> {
        let start_time = Instant::now();
        let mut current = input.clone();
        let mut all_metrics = Vec::new();
        let mut warnings = Vec::new();

        for processor in self.processors.iter_mut() {
            if !processor.config().enabled {
                debug!("Skipping disabled processor '{}'", processor.name());
                continue;
            }

            if !processor.can_process(&current) {
                let message = format!("Processor '{}' cannot handle '{}'", processor.name(), current.name);
                if self.bypass_enabled {
                    warnings.push(message);
                    continue;
                }
                return Err(config_error!("{}", message));
            }

            let timer = ProcessingMetrics::start_timing(processor.name());

            match processor.process(&current) {
                Ok(processed) => {
                    current = processed;
                    all_metrics.push(timer.finish());
                }
                Err(e) => {
                    all_metrics.push(timer.finish_with_error(&e.to_string()));

                    if self.bypass_enabled {
                        warn!("Processor '{}' failed, bypassing: {}", processor.name(), e);
                        warnings.push(format!("Processor '{}' failed: {}, bypassing", processor.name(), e));
                    } else {
                        self.processing_metrics = all_metrics;
                        return Err(e);
                    }
                }
            }
        }

        let total_latency = start_time.elapsed().as_micros() as u64;
        debug!("Pipeline '{}' finished in {}us", self.name, total_latency);

        self.processing_metrics = all_metrics.clone();

        Ok(PipelineResult {
            output: current,
            processing_metrics: all_metrics,
            total_latency_us: total_latency,
            warnings,
        })
    }

    /// Enable/disable bypass mode (continue on processor errors)
    pub fn set_bypass_enabled(&mut self, enabled: bool) {
        self.bypass_enabled = enabled;
    }

    pub fn bypass_enabled(&self) -> bool {
        self.bypass_enabled
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Metrics of the last run
    pub fn performance_summary(&self) -> PipelinePerformance {
        let total_latency = self.processing_metrics.iter().map(|m| m.processing_time_us).sum();

        let success_rate = if self.processing_metrics.is_empty() {
            1.0
        } else {
            let successful = self.processing_metrics.iter().filter(|m| m.success).count();
            successful as f32 / self.processing_metrics.len() as f32
        };

        PipelinePerformance {
            total_latency_us: total_latency,
            success_rate,
            processor_count: self.processors.len(),
        }
    }

    /// Reset all processors in the pipeline
    pub fn reset(&mut self) {
        for processor in &mut self.processors {
            processor.reset();
        }
        self.processing_metrics.clear();
    }

    /// Get processor by name
    pub fn get_processor(&self, name: &str) -> Option<&dyn MeasurementProcessor> {
        self.processors.iter().find(|p| p.name() == name).map(|p| p.as_ref())
    }

    fn get_processor_mut(&mut self, name: &str) -> Option<&mut Box<dyn MeasurementProcessor>> {
        self.processors.iter_mut().find(|p| p.name() == name)
    }

    /// Get list of all processor names
    pub fn processor_names(&self) -> Vec<String> {
        self.processors.iter().map(|p| p.name().to_string()).collect()
    }

    /// Get processor types in pipeline
    pub fn processor_types(&self) -> Vec<ProcessorType> {
        self.processors.iter().map(|p| p.processor_type()).collect()
    }

    /// Update processor configuration by name
    pub fn update_processor_config(&mut self, processor_name: &str, config: ProcessorConfig) -> NqrResult<()> {
        match self.get_processor_mut(processor_name) {
            Some(processor) => processor.update_config(config),
            None => Err(config_error!("Processor '{}' not found in pipeline", processor_name)),
        }
    }

    /// Enable/disable processor by name
    pub fn set_processor_enabled(&mut self, processor_name: &str, enabled: bool) -> NqrResult<()> {
        match self.get_processor_mut(processor_name) {
            Some(processor) => {
                let mut config = processor.config().clone();
                config.enabled = enabled;
                processor.update_config(config)
            }
            None => Err(config_error!("Processor '{}' not found in pipeline", processor_name)),
        }
    }
}

impl PipelineBuilder {
    /// Create new pipeline builder
    pub fn new(name: &str) -> Self {
        PipelineBuilder {
            processors: Vec::new(),
            name: name.to_string(),
            bypass_enabled: false,
        }
    }

    /// Add any processor to the pipeline
    pub fn add_processor(&mut self, processor: Box<dyn MeasurementProcessor>) -> &mut Self {
        self.processors.push(processor);
        self
    }

    /// Add an apodization step
    pub fn add_apodization(&mut self, apodizer: Apodizer) -> &mut Self {
        self.processors.push(Box::new(apodizer));
        self
    }

    /// Add a fit step
    pub fn add_fit<M: FitModel + 'static>(&mut self, name: &str, model: M) -> &mut Self {
        self.processors.push(Box::new(Fitter::new(name, Box::new(model))));
        self
    }

    /// Set bypass mode for error handling
    pub fn set_bypass_enabled(&mut self, enabled: bool) -> &mut Self {
        self.bypass_enabled = enabled;
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Pipeline {
        let mut pipeline = Pipeline::new(&self.name);
        pipeline.set_bypass_enabled(self.bypass_enabled);

        for processor in self.processors {
            pipeline.add_processor(processor);
        }

        pipeline
    }
}
