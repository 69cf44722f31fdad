//! Pipeline configuration.
//!
//! Settings come from defaults, a YAML file, `COUNCIL_*` environment
//! variables, or builder calls, in whatever combination the caller needs.
//! Every source ends in [`PipelineConfig::validate`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agents::{
    BatchConfig, FinalResponder, Synthesizer, DEFAULT_AGENT_TEMPERATURE,
    DEFAULT_EVALUATOR_TEMPERATURE, DEFAULT_FINAL_TEMPERATURE, DEFAULT_NUM_AGENTS,
};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML for this schema.
    #[error("Invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration for an analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // Committee settings
    /// Generation units per batch.
    pub num_agents: usize,
    /// Sampling temperature for generation units.
    pub agent_temperature: f64,
    /// Sampling temperature for the evaluator.
    pub evaluator_temperature: f64,
    /// Sampling temperature for the final response.
    pub final_temperature: f64,

    // Model settings
    /// Model requested from the provider. Empty uses the provider default.
    pub model: String,
    /// Completion length limit for every call.
    pub max_tokens: Option<u32>,
    /// Per-unit time limit, in seconds.
    pub unit_timeout_secs: Option<u64>,
    /// Maximum units calling the provider at once.
    pub max_in_flight: Option<usize>,

    // Paths
    /// Agent template file name, relative to `prompts_dir`.
    pub template_name: String,
    /// Directory prompt templates are loaded from.
    pub prompts_dir: PathBuf,
    /// Directory run logs are written to.
    pub results_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_agents: DEFAULT_NUM_AGENTS,
            agent_temperature: DEFAULT_AGENT_TEMPERATURE,
            evaluator_temperature: DEFAULT_EVALUATOR_TEMPERATURE,
            final_temperature: DEFAULT_FINAL_TEMPERATURE,

            model: String::new(),
            max_tokens: None,
            unit_timeout_secs: None,
            max_in_flight: None,

            template_name: "cotv1.md".to_string(),
            prompts_dir: PathBuf::from("prompts"),
            results_dir: PathBuf::from("analysis_results"),
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration from `COUNCIL_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable cannot be parsed,
    /// or `ConfigError::ValidationFailed` if the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads a configuration from a YAML file. Missing keys keep defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the YAML file at `path` if given (defaults otherwise), then
    /// applies `COUNCIL_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => serde_yaml::from_str(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from `COUNCIL_*` variables found through `lookup`.
    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(val) = lookup("COUNCIL_NUM_AGENTS") {
            self.num_agents = parse_env_value(&val, "COUNCIL_NUM_AGENTS")?;
        }

        if let Some(val) = lookup("COUNCIL_AGENT_TEMPERATURE") {
            self.agent_temperature = parse_env_value(&val, "COUNCIL_AGENT_TEMPERATURE")?;
        }

        if let Some(val) = lookup("COUNCIL_EVALUATOR_TEMPERATURE") {
            self.evaluator_temperature = parse_env_value(&val, "COUNCIL_EVALUATOR_TEMPERATURE")?;
        }

        if let Some(val) = lookup("COUNCIL_FINAL_TEMPERATURE") {
            self.final_temperature = parse_env_value(&val, "COUNCIL_FINAL_TEMPERATURE")?;
        }

        if let Some(val) = lookup("COUNCIL_MODEL") {
            self.model = val;
        }

        if let Some(val) = lookup("COUNCIL_MAX_TOKENS") {
            self.max_tokens = Some(parse_env_value(&val, "COUNCIL_MAX_TOKENS")?);
        }

        if let Some(val) = lookup("COUNCIL_UNIT_TIMEOUT_SECS") {
            self.unit_timeout_secs = Some(parse_env_value(&val, "COUNCIL_UNIT_TIMEOUT_SECS")?);
        }

        if let Some(val) = lookup("COUNCIL_MAX_IN_FLIGHT") {
            self.max_in_flight = Some(parse_env_value(&val, "COUNCIL_MAX_IN_FLIGHT")?);
        }

        if let Some(val) = lookup("COUNCIL_TEMPLATE") {
            self.template_name = val;
        }

        if let Some(val) = lookup("COUNCIL_PROMPTS_DIR") {
            self.prompts_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("COUNCIL_RESULTS_DIR") {
            self.results_dir = PathBuf::from(val);
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_agents == 0 {
            return Err(ConfigError::ValidationFailed(
                "num_agents must be greater than 0".to_string(),
            ));
        }

        for (name, value) in [
            ("agent_temperature", self.agent_temperature),
            ("evaluator_temperature", self.evaluator_temperature),
            ("final_temperature", self.final_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} must be between 0.0 and 2.0",
                    name
                )));
            }
        }

        if self.max_tokens == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "max_tokens must be greater than 0".to_string(),
            ));
        }

        if self.unit_timeout_secs == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "unit_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.max_in_flight == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "max_in_flight must be greater than 0".to_string(),
            ));
        }

        if self.template_name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "template_name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Per-unit time limit as a duration.
    pub fn unit_timeout(&self) -> Option<Duration> {
        self.unit_timeout_secs.map(Duration::from_secs)
    }

    /// Batch settings derived from this configuration.
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig::new()
            .with_num_agents(self.num_agents)
            .with_temperature(self.agent_temperature)
            .with_max_tokens(self.max_tokens)
            .with_unit_timeout(self.unit_timeout())
            .with_max_in_flight(self.max_in_flight)
    }

    pub fn synthesizer(&self) -> Synthesizer {
        Synthesizer::new(self.evaluator_temperature).with_max_tokens(self.max_tokens)
    }

    pub fn final_responder(&self) -> FinalResponder {
        FinalResponder::new(self.final_temperature).with_max_tokens(self.max_tokens)
    }

    /// Builder method to set the number of agents per batch.
    pub fn with_num_agents(mut self, num_agents: usize) -> Self {
        self.num_agents = num_agents;
        self
    }

    /// Builder method to set the agent temperature.
    pub fn with_agent_temperature(mut self, temp: f64) -> Self {
        self.agent_temperature = temp;
        self
    }

    /// Builder method to set the evaluator temperature.
    pub fn with_evaluator_temperature(mut self, temp: f64) -> Self {
        self.evaluator_temperature = temp;
        self
    }

    /// Builder method to set the final response temperature.
    pub fn with_final_temperature(mut self, temp: f64) -> Self {
        self.final_temperature = temp;
        self
    }

    /// Builder method to set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Builder method to set the completion length limit.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Builder method to set the per-unit timeout.
    pub fn with_unit_timeout(mut self, timeout: Duration) -> Self {
        self.unit_timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Builder method to bound concurrent provider calls per batch.
    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit);
        self
    }

    /// Builder method to set the agent template name.
    pub fn with_template_name(mut self, name: impl Into<String>) -> Self {
        self.template_name = name.into();
        self
    }

    /// Builder method to set the prompts directory.
    pub fn with_prompts_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.prompts_dir = path.into();
        self
    }

    /// Builder method to set the results directory.
    pub fn with_results_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_dir = path.into();
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
