//! Execution plans: levels split into the main walk and the finalize walk.

use super::{DependencyGraph, Level, StepDefinition};
use crate::core::StepPhase;
use crate::errors::PipelineError;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// The levels of a step set, ready to execute.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Levels as produced by the graph builder.
    pub levels: Vec<Level>,
    /// Levels without finalize steps; empty levels dropped.
    pub ordinary: Vec<Level>,
    /// Finalize steps of each level; empty levels dropped.
    pub finalize: Vec<Level>,
    /// Fingerprint of the step set this plan was built from.
    pub fingerprint: String,
    registration: Vec<String>,
}

impl ExecutionPlan {
    /// Builds a plan for a step set.
    ///
    /// # Errors
    ///
    /// Returns the graph builder's error for invalid or cyclic step sets.
    pub fn build(steps: &[Arc<StepDefinition>]) -> Result<Self, PipelineError> {
        let levels = DependencyGraph::build(steps)?;

        let split = |keep: fn(&StepDefinition) -> bool| -> Vec<Level> {
            levels
                .iter()
                .map(|level| {
                    Level::new(
                        level
                            .steps
                            .iter()
                            .filter(|step| keep(step))
                            .cloned()
                            .collect(),
                    )
                })
                .filter(|level| !level.is_empty())
                .collect()
        };
        let ordinary = split(|step| !step.phase.is_finalize());
        let finalize = split(|step| step.phase.is_finalize());

        Ok(Self {
            fingerprint: fingerprint(steps),
            registration: steps.iter().map(|step| step.name.clone()).collect(),
            levels,
            ordinary,
            finalize,
        })
    }

    /// Swaps in new definitions for a step set with the same structure,
    /// without rebuilding the graph.
    ///
    /// Returns `None` if the fingerprint or registration order differs.
    #[must_use]
    pub fn rebind(&self, steps: &[Arc<StepDefinition>]) -> Option<Self> {
        if steps.len() != self.registration.len()
            || steps
                .iter()
                .zip(&self.registration)
                .any(|(step, name)| &step.name != name)
            || fingerprint(steps) != self.fingerprint
        {
            return None;
        }

        let by_name: HashMap<&str, &Arc<StepDefinition>> =
            steps.iter().map(|step| (step.name.as_str(), step)).collect();
        let swap = |levels: &[Level]| -> Option<Vec<Level>> {
            levels
                .iter()
                .map(|level| {
                    level
                        .steps
                        .iter()
                        .map(|step| by_name.get(step.name.as_str()).map(|s| Arc::clone(s)))
                        .collect::<Option<Vec<_>>>()
                        .map(Level::new)
                })
                .collect()
        };

        Some(Self {
            levels: swap(&self.levels)?,
            ordinary: swap(&self.ordinary)?,
            finalize: swap(&self.finalize)?,
            fingerprint: self.fingerprint.clone(),
            registration: self.registration.clone(),
        })
    }

    /// Returns the number of steps in the plan.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.levels.iter().map(Level::len).sum()
    }

    /// Returns true if the main walk contains a prepare step.
    #[must_use]
    pub fn has_prepare(&self) -> bool {
        self.ordinary
            .iter()
            .any(|level| level.contains_phase(StepPhase::Prepare))
    }
}

/// Content fingerprint of a step set.
///
/// SHA-256 over the sorted `(name, phase, after, before)` tuples, so it is
/// independent of registration order and runner identity.
#[must_use]
pub fn fingerprint(steps: &[Arc<StepDefinition>]) -> String {
    let mut entries: Vec<String> = steps
        .iter()
        .map(|step| {
            let mut after = step.after.clone();
            after.sort();
            let mut before = step.before.clone();
            before.sort();
            format!(
                "{}|{}|{}|{}",
                step.name,
                step.phase,
                after.join(","),
                before.join(",")
            )
        })
        .collect();
    entries.sort();

    let mut hasher = Sha256::new();
    for entry in &entries {
        hasher.update(entry.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
