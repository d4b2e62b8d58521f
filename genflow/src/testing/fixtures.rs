//! Test fixtures for steps and pipelines.

use std::any::Any;
use std::sync::{Arc, OnceLock};

use crate::context::{ChannelConfig, ContextFactory, GenerationRequest, PipelineContext, StepContext};
use crate::errors::PipelineError;
use crate::pipeline::{
    GenerationPipeline, InMemoryChannelStore, InMemoryStepConfigStore, PipelineBuilder,
    StepDefinition,
};
use crate::services::ServiceRegistry;
use crate::steps::NoOpStep;

/// Channel id used by fixtures.
pub const TEST_CHANNEL_ID: u64 = 1;

/// Channel name used by fixtures.
pub const TEST_CHANNEL_NAME: &str = "test-channel";

/// A reusable setup: one channel, a config store, services and a lazily
/// created context shared by every step view.
#[derive(Debug)]
pub struct TestFixture {
    channel: ChannelConfig,
    config_store: Arc<InMemoryStepConfigStore>,
    services: Arc<ServiceRegistry>,
    prompt: String,
    uid: Option<u64>,
    context: OnceLock<Arc<PipelineContext>>,
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl TestFixture {
    /// Creates a fixture with prompt "a cat" and no user.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channel: ChannelConfig::new(TEST_CHANNEL_ID, TEST_CHANNEL_NAME),
            config_store: Arc::new(InMemoryStepConfigStore::new()),
            services: Arc::new(ServiceRegistry::new()),
            prompt: "a cat".to_string(),
            uid: None,
            context: OnceLock::new(),
        }
    }

    /// Sets the prompt.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Sets the caller's user id.
    #[must_use]
    pub fn with_uid(mut self, uid: u64) -> Self {
        self.uid = Some(uid);
        self
    }

    /// Sets a global config value.
    #[must_use]
    pub fn with_global_config(
        self,
        group: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.config_store.set_value(group, key, value);
        self
    }

    /// Sets a channel override value.
    #[must_use]
    pub fn with_channel_override(
        mut self,
        group: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.channel = self.channel.with_override(group, key, value);
        self
    }

    /// Turns a step on or off for the fixture channel.
    #[must_use]
    pub fn with_step_toggle(mut self, group: impl Into<String>, step: impl Into<String>, enabled: bool) -> Self {
        self.channel = self.channel.with_step_toggle(group, step, enabled);
        self
    }

    /// Registers a service.
    #[must_use]
    pub fn with_service<T: Any + Send + Sync>(self, name: impl Into<String>, service: T) -> Self {
        self.services.register(name, service);
        self
    }

    /// Returns the fixture channel.
    #[must_use]
    pub fn channel(&self) -> &ChannelConfig {
        &self.channel
    }

    /// Returns the service registry.
    #[must_use]
    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Returns a context factory over the fixture's stores.
    #[must_use]
    pub fn factory(&self) -> ContextFactory {
        ContextFactory::new(self.config_store.clone(), self.services.clone())
    }

    /// Returns the shared context, creating it on first use.
    #[must_use]
    pub fn context(&self) -> Arc<PipelineContext> {
        self.context
            .get_or_init(|| {
                let mut request = GenerationRequest::new(TEST_CHANNEL_ID, self.prompt.clone());
                request.uid = self.uid;
                self.factory().create(
                    uuid::Uuid::new_v4(),
                    request,
                    Some(TEST_CHANNEL_ID),
                    Some(self.channel.clone()),
                )
            })
            .clone()
    }

    /// Returns a view for a plain step with the given name.
    #[must_use]
    pub fn step_context(&self, name: &str) -> StepContext {
        self.step_context_for(&StepDefinition::new(name, Arc::new(NoOpStep)))
    }

    /// Returns a view for a declared step.
    #[must_use]
    pub fn step_context_for(&self, step: &StepDefinition) -> StepContext {
        self.factory().step_context(&self.context(), step)
    }

    /// Returns a request for the fixture channel.
    #[must_use]
    pub fn request(&self) -> GenerationRequest {
        let mut request = GenerationRequest::new(TEST_CHANNEL_ID, self.prompt.clone());
        request.uid = self.uid;
        request
    }

    /// Returns a builder wired to the fixture's channel, config and services.
    #[must_use]
    pub fn builder(&self) -> PipelineBuilder {
        PipelineBuilder::new("test")
            .with_channel_store(Arc::new(
                InMemoryChannelStore::new().with_channel(self.channel.clone()),
            ))
            .with_config_store(self.config_store.clone())
            .with_services(self.services.clone())
    }

    /// Builds a pipeline from step declarations.
    ///
    /// # Errors
    ///
    /// Returns the builder's validation error.
    pub fn pipeline(
        &self,
        steps: impl IntoIterator<Item = StepDefinition>,
    ) -> Result<GenerationPipeline, PipelineError> {
        self.builder().steps(steps)?.build()
    }
}
