//! Configuration management for measurement processing

use crate::apodization::Apodizer;
use crate::fitting::Fitter;
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::processor::{MeasurementProcessor, ParameterValue, ProcessorConfig, ProcessorType};
use nqr_core::{config_error, NqrResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Named processors and the pipelines that chain them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Configuration name/profile
    pub name: String,
    /// Individual processor configurations
    pub processors: HashMap<String, ProcessorConfig>,
    /// Pipeline configurations
    pub pipelines: HashMap<String, PipelineConfig>,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,
    /// Enabled state
    pub enabled: bool,
    /// Continue past failing processors
    #[serde(default)]
    pub bypass_on_error: bool,
    /// Processor chain (in execution order)
    pub processor_chain: Vec<String>,
}

/// Preset configurations for common scenarios
impl ProcessingConfig {
    /// Empty configuration
    pub fn new(name: &str) -> Self {
        ProcessingConfig {
            name: name.to_string(),
            processors: HashMap::new(),
            pipelines: HashMap::new(),
        }
    }

    /// Exponential apodization matched to the expected decay, then a T2* fit
    pub fn fid_apodization() -> Self {
        let mut config = ProcessingConfig::new("FID apodization");

        config.add_apodization("fid_window", "FID", &[("T2star", 50.0)], true);
        config.add_fit("t2star_fit", "T2*");

        config.add_pipeline("fid_apodization", vec![
            "fid_window".to_string(),
            "t2star_fit".to_string(),
        ]);

        config
    }

    /// Decay constant from the time signal and the line shape from the spectrum
    pub fn t2star_analysis() -> Self {
        let mut config = ProcessingConfig::new("T2* analysis");

        config.add_fit("t2star_fit", "T2*");
        config.add_fit("linewidth_fit", "Lorentzian");

        config.add_pipeline("t2star_analysis", vec![
            "t2star_fit".to_string(),
            "linewidth_fit".to_string(),
        ]);
        if let Some(pipeline) = config.pipelines.get_mut("t2star_analysis") {
            pipeline.bypass_on_error = true;
        }

        config
    }

    /// Both presets in one configuration
    pub fn presets() -> Self {
        let mut config = Self::fid_apodization();
        let analysis = Self::t2star_analysis();
        config.name = "Presets".to_string();
        config.processors.extend(analysis.processors);
        config.pipelines.extend(analysis.pipelines);
        config
    }

    /// Add apodization processor configuration
    pub fn add_apodization(&mut self, name: &str, function: &str, parameters: &[(&str, f64)], span_time_axis: bool) {
        let mut config = ProcessorConfig::new(name, ProcessorType::Apodization);
        config.set_parameter("function", function.into());
        config.set_parameter("span_time_axis", span_time_axis.into());
        for (symbol, value) in parameters {
            config.set_parameter(symbol, (*value).into());
        }

        self.processors.insert(name.to_string(), config);
    }

    /// Add fit processor configuration
    pub fn add_fit(&mut self, name: &str, model: &str) {
        let mut config = ProcessorConfig::new(name, ProcessorType::Fit);
        config.set_parameter("model", model.into());

        self.processors.insert(name.to_string(), config);
    }

    /// Add pipeline configuration
    pub fn add_pipeline(&mut self, name: &str, processor_chain: Vec<String>) {
        let pipeline_config = PipelineConfig {
            name: name.to_string(),
            enabled: true,
            bypass_on_error: false,
            processor_chain,
        };

        self.pipelines.insert(name.to_string(), pipeline_config);
    }

    /// Validate entire configuration
    pub fn validate(&self) -> NqrResult<()> {
        for (name, processor_config) in &self.processors {
            instantiate(processor_config).map_err(|e| {
                config_error!("Processor '{}' configuration invalid: {}", name, e)
            })?;
        }

        for (pipeline_name, pipeline_config) in &self.pipelines {
            self.validate_pipeline(pipeline_name, pipeline_config)?;
        }

        Ok(())
    }

    fn validate_pipeline(&self, pipeline_name: &str, pipeline_config: &PipelineConfig) -> NqrResult<()> {
        if pipeline_config.processor_chain.is_empty() {
            return Err(config_error!("Pipeline '{}' has no processors", pipeline_name));
        }

        for processor_name in &pipeline_config.processor_chain {
            if !self.processors.contains_key(processor_name) {
                return Err(config_error!(
                    "Pipeline '{}' references unknown processor '{}'",
                    pipeline_name, processor_name
                ));
            }
        }

        Ok(())
    }

    /// Get processor configuration by name
    pub fn get_processor(&self, name: &str) -> Option<&ProcessorConfig> {
        self.processors.get(name)
    }

    /// Get pipeline configuration by name
    pub fn get_pipeline(&self, name: &str) -> Option<&PipelineConfig> {
        self.pipelines.get(name)
    }

    /// Update processor parameter
    pub fn update_processor_param(&mut self, processor_name: &str, param_name: &str, value: ParameterValue) -> NqrResult<()> {
        match self.processors.get_mut(processor_name) {
            Some(processor_config) => {
                processor_config.set_parameter(param_name, value);
                Ok(())
            }
            None => Err(config_error!("Processor '{}' not found", processor_name)),
        }
    }

    /// Enable/disable processor
    pub fn set_processor_enabled(&mut self, processor_name: &str, enabled: bool) -> NqrResult<()> {
        match self.processors.get_mut(processor_name) {
            Some(processor_config) => {
                processor_config.enabled = enabled;
                Ok(())
            }
            None => Err(config_error!("Processor '{}' not found", processor_name)),
        }
    }

    /// Instantiate the processors of a pipeline in chain order
    pub fn build_pipeline(&self, pipeline_name: &str) -> NqrResult<Pipeline> {
        let pipeline_config = self
            .pipelines
            .get(pipeline_name)
            .ok_or_else(|| config_error!("Pipeline '{}' not found", pipeline_name))?;

        if !pipeline_config.enabled {
            return Err(config_error!("Pipeline '{}' is disabled", pipeline_name));
        }
        self.validate_pipeline(pipeline_name, pipeline_config)?;

        let mut builder = PipelineBuilder::new(&pipeline_config.name);
        builder.set_bypass_enabled(pipeline_config.bypass_on_error);

        for processor_name in &pipeline_config.processor_chain {
            let processor_config = self
                .processors
                .get(processor_name)
                .ok_or_else(|| config_error!("Processor '{}' not found", processor_name))?;
            builder.add_processor(instantiate(processor_config)?);
        }

        debug!("Built pipeline '{}' with {} processors", pipeline_name, pipeline_config.processor_chain.len());
        Ok(builder.build())
    }

    /// Export configuration to JSON
    pub fn to_json(&self) -> NqrResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| config_error!("Failed to serialize configuration: {}", e))
    }

    /// Import configuration from JSON
    pub fn from_json(json: &str) -> NqrResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| config_error!("Failed to deserialize configuration: {}", e))
    }

    /// Read and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> NqrResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| config_error!("Failed to read {}: {}", path.display(), e))?;
        let config = Self::from_json(&json)?;
        config.validate()?;

        info!("Loaded processing configuration '{}' from {}", config.name, path.display());
        Ok(config)
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self::presets()
    }
}

fn instantiate(config: &ProcessorConfig) -> NqrResult<Box<dyn MeasurementProcessor>> {
    Ok(match config.processor_type {
        ProcessorType::Apodization => Box::new(Apodizer::from_config(config.clone())?),
        ProcessorType::Fit => Box::new(Fitter::from_config(config.clone())?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        let config = ProcessingConfig::fid_apodization();
        assert!(config.validate().is_ok());
        assert_eq!(config.processors.len(), 2);

        let config = ProcessingConfig::t2star_analysis();
        assert!(config.validate().is_ok());
        assert!(config.pipelines["t2star_analysis"].bypass_on_error);

        let config = ProcessingConfig::default();
        assert_eq!(config.pipelines.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ProcessingConfig::fid_apodization();

        config.update_processor_param("fid_window", "function", "Bogus".into()).unwrap();
        assert!(config.validate().is_err());

        config.update_processor_param("fid_window", "function", "Gaussian".into()).unwrap();
        assert!(config.validate().is_ok());

        config.add_fit("broken", "polynomial");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_processor_management() {
        let mut config = ProcessingConfig::t2star_analysis();

        config.add_apodization("test_window", "Sinc", &[("l", 3.0)], false);
        assert!(config.processors.contains_key("test_window"));

        assert!(config.update_processor_param("test_window", "l", 4.0.into()).is_ok());
        assert_eq!(config.processors["test_window"].get_float("l", 0.0), 4.0);
        assert!(config.update_processor_param("missing", "l", 4.0.into()).is_err());

        assert!(config.set_processor_enabled("test_window", false).is_ok());
        assert!(!config.processors["test_window"].enabled);
    }

    #[test]
    fn test_pipeline_validation() {
        let mut config = ProcessingConfig::fid_apodization();

        config.add_pipeline("test_pipeline", vec!["t2star_fit".to_string()]);
        assert!(config.validate().is_ok());

        config.add_pipeline("invalid_pipeline", vec!["nonexistent_processor".to_string()]);
        assert!(config.validate().is_err());

        config.add_pipeline("invalid_pipeline", Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_pipeline() {
        let config = ProcessingConfig::presets();

        let pipeline = config.build_pipeline("fid_apodization").unwrap();
        assert_eq!(pipeline.processor_names(), vec!["fid_window", "t2star_fit"]);
        assert!(!pipeline.bypass_enabled());

        let pipeline = config.build_pipeline("t2star_analysis").unwrap();
        assert!(pipeline.bypass_enabled());

        assert!(config.build_pipeline("missing").is_err());

        let mut disabled = config.clone();
        disabled.pipelines.get_mut("fid_apodization").unwrap().enabled = false;
        assert!(disabled.build_pipeline("fid_apodization").is_err());
    }

    #[test]
    fn test_json_serialization() {
        let config = ProcessingConfig::presets();

        let json = config.to_json().unwrap();
        assert!(json.contains("fid_window"));

        let restored = ProcessingConfig::from_json(&json).unwrap();
        assert_eq!(config.name, restored.name);
        assert_eq!(restored.processors["fid_window"].get_float("T2star", 0.0), 50.0);
        assert!(restored.validate().is_ok());

        assert!(ProcessingConfig::from_json("{").is_err());
    }
}
