//! Pipeline building and execution.
//!
//! This module provides:
//! - Step declarations and the runtime step registry
//! - The dependency graph builder and cached execution plans
//! - The level-by-level executor
//! - Interfaces to channel and config storage, with in-memory versions

mod builder;
mod definition;
mod executor;
mod graph;
mod interfaces;
mod plan;
mod registry;

#[cfg(test)]
mod integration_tests;

pub use builder::PipelineBuilder;
pub use definition::StepDefinition;
pub use executor::GenerationPipeline;
pub use graph::{DependencyGraph, Level};
pub use interfaces::{
    ChannelOverrideGate, ChannelStore, InMemoryChannelStore, InMemoryStepConfigStore,
    StepConfigStore, StepGate,
};
#[cfg(test)]
pub use interfaces::MockChannelStore;
pub use plan::{fingerprint, ExecutionPlan};
pub use registry::StepRegistry;
