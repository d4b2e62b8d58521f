//! Registry of step definitions.
//!
//! Plugins register and unregister steps at runtime; the executor reads a
//! snapshot per request.

use super::StepDefinition;
use crate::errors::{PipelineError, PipelineValidationError};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Registered steps, in registration order.
///
/// Every mutation bumps a revision counter so readers can tell whether a
/// cached view is still current.
#[derive(Debug, Default)]
pub struct StepRegistry {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    steps: Vec<Arc<StepDefinition>>,
    revision: u64,
}

impl StepRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a step.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid declaration or a name that
    /// is already registered.
    pub fn register(&self, step: StepDefinition) -> Result<(), PipelineError> {
        step.validate()?;
        let mut inner = self.inner.write();
        if inner.steps.iter().any(|s| s.name == step.name) {
            return Err(PipelineValidationError::duplicate_step(&step.name).into());
        }
        debug!(step = %step.name, phase = %step.phase, "Registered step");
        inner.steps.push(Arc::new(step));
        inner.revision += 1;
        Ok(())
    }

    /// Registers or replaces a step, keeping its registration slot.
    ///
    /// Returns the replaced definition, if any.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid declaration.
    pub fn replace(&self, step: StepDefinition) -> Result<Option<Arc<StepDefinition>>, PipelineError> {
        step.validate()?;
        let mut inner = self.inner.write();
        inner.revision += 1;
        let step = Arc::new(step);
        match inner.steps.iter().position(|s| s.name == step.name) {
            Some(i) => Ok(Some(std::mem::replace(&mut inner.steps[i], step))),
            None => {
                inner.steps.push(step);
                Ok(None)
            }
        }
    }

    /// Removes a step. Returns the removed definition, if any.
    pub fn unregister(&self, name: &str) -> Option<Arc<StepDefinition>> {
        let mut inner = self.inner.write();
        let index = inner.steps.iter().position(|s| s.name == name)?;
        debug!(step = %name, "Unregistered step");
        inner.revision += 1;
        Some(inner.steps.remove(index))
    }

    /// Gets a step by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<StepDefinition>> {
        self.inner.read().steps.iter().find(|s| s.name == name).cloned()
    }

    /// Returns the current step set.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<StepDefinition>> {
        self.inner.read().steps.clone()
    }

    /// Returns the current step set together with its revision, read
    /// under one lock.
    #[must_use]
    pub fn snapshot_with_revision(&self) -> (Vec<Arc<StepDefinition>>, u64) {
        let inner = self.inner.read();
        (inner.steps.clone(), inner.revision)
    }

    /// Returns the revision, bumped by every register, replace and
    /// unregister.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.inner.read().revision
    }

    /// Returns the registered names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner.read().steps.iter().map(|s| s.name.clone()).collect()
    }

    /// Returns the number of registered steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().steps.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().steps.is_empty()
    }
}
