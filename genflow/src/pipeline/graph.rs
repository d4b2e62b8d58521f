//! Dependency graph builder.
//!
//! Turns a flat set of step declarations into levels: ordered groups of
//! steps with no ordering constraint among them.

use super::StepDefinition;
use crate::core::StepPhase;
use crate::errors::{CycleDetectedError, PipelineError, PipelineValidationError};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Steps that may run concurrently, in registration order.
#[derive(Debug, Clone, Default)]
pub struct Level {
    /// The steps of the level.
    pub steps: Vec<Arc<StepDefinition>>,
}

impl Level {
    /// Creates a level.
    #[must_use]
    pub fn new(steps: Vec<Arc<StepDefinition>>) -> Self {
        Self { steps }
    }

    /// Returns true if any step has the given phase.
    #[must_use]
    pub fn contains_phase(&self, phase: StepPhase) -> bool {
        self.steps.iter().any(|step| step.phase == phase)
    }

    /// Returns the step names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name.as_str()).collect()
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true for an empty level.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Builds levels from step declarations.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyGraph;

impl DependencyGraph {
    /// Layers the steps.
    ///
    /// `B` depends on `A` if `B.after` names `A` or `A.before` names `B`.
    /// Each level holds every step whose dependencies sit in earlier levels,
    /// so the number of levels is minimal. Deterministic for a fixed input.
    ///
    /// # Errors
    ///
    /// `PipelineError::Validation` for invalid declarations and duplicate
    /// names, `PipelineError::CycleDetected` if the dependencies form a
    /// cycle.
    pub fn build(steps: &[Arc<StepDefinition>]) -> Result<Vec<Level>, PipelineError> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            step.validate()?;
            if index.insert(step.name.as_str(), i).is_some() {
                return Err(PipelineValidationError::duplicate_step(&step.name).into());
            }
        }

        // deps[i] = registration indices that must finish before step i.
        let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); steps.len()];
        for (i, step) in steps.iter().enumerate() {
            for name in &step.after {
                match index.get(name.as_str()) {
                    Some(&j) => {
                        deps[i].insert(j);
                    }
                    None => debug!(step = %step.name, after = %name, "Ignoring unknown dependency"),
                }
            }
            for name in &step.before {
                match index.get(name.as_str()) {
                    Some(&j) => {
                        deps[j].insert(i);
                    }
                    None => debug!(step = %step.name, before = %name, "Ignoring unknown dependent"),
                }
            }
        }

        let mut placed = vec![false; steps.len()];
        let mut remaining = steps.len();
        let mut levels = Vec::new();

        while remaining > 0 {
            let ready: Vec<usize> = (0..steps.len())
                .filter(|&i| !placed[i] && deps[i].iter().all(|&j| placed[j]))
                .collect();

            if ready.is_empty() {
                return Err(find_cycle(steps, &deps, &placed).into());
            }

            for &i in &ready {
                placed[i] = true;
            }
            remaining -= ready.len();
            levels.push(Level::new(ready.into_iter().map(|i| steps[i].clone()).collect()));
        }

        Ok(levels)
    }
}

/// Walks unplaced dependencies from the first unplaced step until a step
/// repeats. Every unplaced step has an unplaced dependency, so the walk
/// always closes a cycle.
fn find_cycle(
    steps: &[Arc<StepDefinition>],
    deps: &[BTreeSet<usize>],
    placed: &[bool],
) -> CycleDetectedError {
    let Some(start) = placed.iter().position(|p| !p) else {
        return CycleDetectedError::new(Vec::new());
    };

    let mut path = vec![start];
    let mut position: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;

    loop {
        let Some(&next) = deps[current].iter().find(|&&j| !placed[j]) else {
            break;
        };
        if let Some(&at) = position.get(&next) {
            // The walk follows dependencies backwards; reverse it so that
            // each step in the path runs after its predecessor.
            let mut cycle: Vec<String> = path[at..]
                .iter()
                .rev()
                .map(|&i| steps[i].name.clone())
                .collect();
            if let Some(first) = cycle.first().cloned() {
                cycle.push(first);
            }
            return CycleDetectedError::new(cycle);
        }
        position.insert(next, path.len());
        path.push(next);
        current = next;
    }

    CycleDetectedError::new(path.iter().map(|&i| steps[i].name.clone()).collect())
}
