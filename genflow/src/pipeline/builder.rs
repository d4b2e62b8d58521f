//! Pipeline builder with validation.

use super::{
    ChannelOverrideGate, ChannelStore, GenerationPipeline, InMemoryChannelStore,
    InMemoryStepConfigStore, StepConfigStore, StepDefinition, StepGate, StepRegistry,
};
use crate::config::PipelineConfig;
use crate::context::ContextFactory;
use crate::errors::PipelineError;
use crate::events::{EventSink, NoOpEventSink};
use crate::services::ServiceRegistry;
use std::any::Any;
use std::sync::Arc;

/// Composes a [`GenerationPipeline`] from steps, stores and services.
///
/// Anything not set falls back to an empty in-memory implementation, so a
/// bare builder with a few steps is enough for tests and demos.
pub struct PipelineBuilder {
    config: PipelineConfig,
    registry: Arc<StepRegistry>,
    channel_store: Option<Arc<dyn ChannelStore>>,
    config_store: Option<Arc<dyn StepConfigStore>>,
    gate: Option<Arc<dyn StepGate>>,
    services: Arc<ServiceRegistry>,
    event_sink: Arc<dyn EventSink>,
}

impl PipelineBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_config(PipelineConfig::default().with_name(name))
    }

    /// Creates a builder from a loaded configuration.
    #[must_use]
    pub fn from_config(config: PipelineConfig) -> Self {
        Self {
            config,
            registry: Arc::new(StepRegistry::new()),
            channel_store: None,
            config_store: None,
            gate: None,
            services: Arc::new(ServiceRegistry::new()),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Adds a step.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid declaration or a duplicate
    /// name. Cycles are reported by [`build`](Self::build).
    pub fn step(mut self, step: StepDefinition) -> Result<Self, PipelineError> {
        self.add_step(step)?;
        Ok(self)
    }

    /// Adds a step in place.
    ///
    /// # Errors
    ///
    /// Same as [`step`](Self::step).
    pub fn add_step(&mut self, step: StepDefinition) -> Result<(), PipelineError> {
        self.registry.register(step)
    }

    /// Adds several steps.
    ///
    /// # Errors
    ///
    /// Stops at the first invalid or duplicate step.
    pub fn steps(
        mut self,
        steps: impl IntoIterator<Item = StepDefinition>,
    ) -> Result<Self, PipelineError> {
        for step in steps {
            self.add_step(step)?;
        }
        Ok(self)
    }

    /// Uses an existing registry. Steps added earlier to this builder are
    /// moved into it.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a moved step is already registered.
    pub fn with_registry(mut self, registry: Arc<StepRegistry>) -> Result<Self, PipelineError> {
        for step in self.registry.snapshot() {
            registry.register(step.as_ref().clone())?;
        }
        self.registry = registry;
        Ok(self)
    }

    /// Sets the channel store.
    #[must_use]
    pub fn with_channel_store(mut self, store: Arc<dyn ChannelStore>) -> Self {
        self.channel_store = Some(store);
        self
    }

    /// Sets the global step config store.
    #[must_use]
    pub fn with_config_store(mut self, store: Arc<dyn StepConfigStore>) -> Self {
        self.config_store = Some(store);
        self
    }

    /// Sets the gate deciding which steps run for a channel.
    ///
    /// Replaces the default [`ChannelOverrideGate`], so the configured
    /// `disabled_steps` no longer apply.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<dyn StepGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Uses a shared service registry.
    #[must_use]
    pub fn with_services(mut self, services: Arc<ServiceRegistry>) -> Self {
        self.services = services;
        self
    }

    /// Registers a service.
    #[must_use]
    pub fn with_service<T: Any + Send + Sync>(self, name: impl Into<String>, service: T) -> Self {
        self.services.register(name, service);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Turns panic conversion on or off.
    #[must_use]
    pub fn with_catch_panics(mut self, catch_panics: bool) -> Self {
        self.config.catch_panics = catch_panics;
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns the number of steps added so far.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.registry.len()
    }

    /// Builds the pipeline and its first execution plan.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` for an invalid configuration and
    /// `PipelineError::CycleDetected` if the steps form a cycle.
    pub fn build(self) -> Result<GenerationPipeline, PipelineError> {
        self.config.validate()?;

        let config_store = self
            .config_store
            .unwrap_or_else(|| Arc::new(InMemoryStepConfigStore::new()));
        let channel_store = self
            .channel_store
            .unwrap_or_else(|| Arc::new(InMemoryChannelStore::new()));
        let gate = self.gate.unwrap_or_else(|| {
            Arc::new(ChannelOverrideGate::with_disabled(
                self.config.disabled_steps.iter().cloned(),
            ))
        });
        let factory =
            ContextFactory::new(config_store, self.services).with_event_sink(self.event_sink);

        let pipeline = GenerationPipeline::new(
            self.config.name,
            self.registry,
            factory,
            channel_store,
            gate,
            self.config.catch_panics,
        );
        pipeline.plan()?;
        Ok(pipeline)
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("config", &self.config)
            .field("steps", &self.registry.names())
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}
