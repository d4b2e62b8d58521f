//! Step declarations.

use crate::core::StepPhase;
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::steps::Step;
use std::fmt;
use std::sync::Arc;

/// Declaration of a single step: identity, ordering hints and the runner.
///
/// Immutable once registered. `after` and `before` name other steps; names
/// that are not registered are ignored at graph-build time.
#[derive(Clone)]
pub struct StepDefinition {
    /// The unique name of the step.
    pub name: String,
    /// Human-readable label.
    pub label: Option<String>,
    /// Free-text category.
    pub category: Option<String>,
    /// Phase tag.
    pub phase: StepPhase,
    /// Config group the step reads.
    pub config_group: Option<String>,
    /// Steps this step must run after.
    pub after: Vec<String>,
    /// Steps this step must run before.
    pub before: Vec<String>,
    /// The step implementation.
    pub runner: Arc<dyn Step>,
}

impl StepDefinition {
    /// Creates a `pre-request` step with no ordering hints.
    #[must_use]
    pub fn new(name: impl Into<String>, runner: Arc<dyn Step>) -> Self {
        Self {
            name: name.into(),
            label: None,
            category: None,
            phase: StepPhase::default(),
            config_group: None,
            after: Vec::new(),
            before: Vec::new(),
            runner,
        }
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Sets the phase.
    #[must_use]
    pub fn with_phase(mut self, phase: StepPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Sets the config group.
    #[must_use]
    pub fn with_config_group(mut self, group: impl Into<String>) -> Self {
        self.config_group = Some(group.into());
        self
    }

    /// Runs this step after `step`.
    #[must_use]
    pub fn after(mut self, step: impl Into<String>) -> Self {
        self.after.push(step.into());
        self
    }

    /// Runs this step before `step`.
    #[must_use]
    pub fn before(mut self, step: impl Into<String>) -> Self {
        self.before.push(step.into());
        self
    }

    /// Returns the config group, falling back to the category, then the name.
    #[must_use]
    pub fn effective_config_group(&self) -> String {
        self.config_group
            .as_deref()
            .or(self.category.as_deref())
            .unwrap_or(&self.name)
            .to_string()
    }

    /// Returns the label, falling back to the name.
    #[must_use]
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// Validates the declaration on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank or the step orders itself
    /// relative to itself.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new("Step name cannot be empty")
                .with_error_info(
                    ContractErrorInfo::new("CONTRACT-004-EMPTY_NAME", "Step has an empty name")
                        .with_fix_hint("Give every step a non-empty, unique name."),
                ));
        }

        if self.after.contains(&self.name) || self.before.contains(&self.name) {
            return Err(PipelineValidationError::new(format!(
                "Step '{}' cannot depend on itself",
                self.name
            ))
            .with_steps(vec![self.name.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "CONTRACT-004-SELF_DEP",
                    format!("Step '{}' lists itself in after/before", self.name),
                )
                .with_fix_hint("Remove the step's own name from its after/before hints."),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("config_group", &self.config_group)
            .field("after", &self.after)
            .field("before", &self.before)
            .finish_non_exhaustive()
    }
}
