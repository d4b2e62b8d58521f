//! Pipeline configuration.
//!
//! Loaded from JSON. Every field has a default, so `{}` is a valid config.

use crate::errors::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Logging settings consumed by [`init_tracing`](crate::observability::init_tracing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level for the `genflow` target when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_name() -> String {
    "generation".to_string()
}

fn default_catch_panics() -> bool {
    true
}

/// Top-level configuration of a [`GenerationPipeline`](crate::pipeline::GenerationPipeline).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name used in logs and events.
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Convert panics escaping a step into step errors. When off, the
    /// panic is re-raised from `execute` after the finalize walk.
    #[serde(default = "default_catch_panics")]
    pub catch_panics: bool,
    /// Steps disabled for every channel unless a channel turns them on.
    #[serde(default)]
    pub disabled_steps: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            logging: LoggingConfig::default(),
            catch_panics: default_catch_panics(),
            disabled_steps: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Parses a config from JSON.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Serialization` for malformed JSON and
    /// `PipelineError::Config` for an empty pipeline name.
    pub fn from_json_str(json: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Io` if the file cannot be read, otherwise as
    /// [`Self::from_json_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Checks field values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::Config("pipeline name must not be empty".to_string()));
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(PipelineError::Config(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }
        Ok(())
    }

    /// Sets the pipeline name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds a globally disabled step.
    #[must_use]
    pub fn with_disabled_step(mut self, step: impl Into<String>) -> Self {
        self.disabled_steps.push(step.into());
        self
    }

    /// Sets whether panics are caught.
    #[must_use]
    pub fn with_catch_panics(mut self, catch_panics: bool) -> Self {
        self.catch_panics = catch_panics;
        self
    }
}
