//! Error types for the genflow scheduler.
//!
//! Configuration problems (duplicate names, self-dependencies, cycles) are
//! reported as [`PipelineValidationError`] before any step runs. Step
//! failures are not errors of this module: they travel as
//! [`StepSignal::Error`](crate::core::StepSignal) and end up in the
//! [`GenerationResult`](crate::context::GenerationResult).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for genflow operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The step set is not a valid pipeline.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// The step set contains a dependency cycle.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// A step wrote a scratch-store key owned by another step.
    #[error("{0}")]
    StoreConflict(#[from] StoreConflictError),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed request input (e.g. a bad data URL).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-004-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a step set cannot form a pipeline.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The steps involved in the error.
    pub steps: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            steps: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the steps involved.
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<String>) -> Self {
        self.steps = steps;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }

    /// Error for two registrations sharing a name.
    #[must_use]
    pub fn duplicate_step(name: &str) -> Self {
        Self::new(format!("Step '{name}' is registered more than once"))
            .with_steps(vec![name.to_string()])
            .with_error_info(
                ContractErrorInfo::new(
                    "CONTRACT-004-DUPLICATE",
                    format!("Duplicate step name '{name}'"),
                )
                .with_fix_hint("Step names must be unique across all registered plugins."),
            )
    }
}

/// Error raised when a cycle is detected in the step graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of steps forming the cycle; first and last entries match.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "CONTRACT-004-CYCLE",
            format!("Pipeline contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the after/before hints in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }

    /// Returns the distinct step names on the cycle.
    #[must_use]
    pub fn steps(&self) -> Vec<String> {
        let mut steps = self.cycle_path.clone();
        if steps.len() > 1 && steps.first() == steps.last() {
            steps.pop();
        }
        steps
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            steps: err.steps(),
            error_info: Some(err.error_info),
        }
    }
}

/// Error raised when a step writes a store key owned by another step.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Store conflict: key '{key}' is owned by step '{owner}', step '{writer}' cannot write it")]
pub struct StoreConflictError {
    /// The conflicting key.
    pub key: String,
    /// The step that first wrote the key.
    pub owner: String,
    /// The step whose write was rejected.
    pub writer: String,
}

impl StoreConflictError {
    /// Creates a new store conflict error.
    #[must_use]
    pub fn new(key: impl Into<String>, owner: impl Into<String>, writer: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            owner: owner.into(),
            writer: writer.into(),
        }
    }
}
