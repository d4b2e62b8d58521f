//! Builds per-request contexts and per-step views.

use super::{ChannelConfig, ConfigMap, GenerationRequest, PipelineContext, StepContext, STEP_TOGGLE_KEY};
use crate::events::{EventSink, NoOpEventSink};
use crate::pipeline::{StepConfigStore, StepDefinition};
use crate::services::ServiceRegistry;
use std::sync::Arc;
use uuid::Uuid;

/// Merges a group's global config with a channel override.
///
/// Override keys win. The reserved toggle key of the override is never
/// merged. Returns `None` when neither layer exists.
#[must_use]
pub fn merge_step_config(
    global: Option<&ConfigMap>,
    channel_override: Option<&ConfigMap>,
) -> Option<ConfigMap> {
    if global.is_none() && channel_override.is_none() {
        return None;
    }

    let mut merged = global.cloned().unwrap_or_default();
    if let Some(overrides) = channel_override {
        for (key, value) in overrides {
            if key == STEP_TOGGLE_KEY {
                continue;
            }
            merged.insert(key.clone(), value.clone());
        }
    }
    Some(merged)
}

/// Resolves the effective config of a group straight from the stores.
pub async fn resolve_step_config(
    config_store: &dyn StepConfigStore,
    group: &str,
    channel: Option<&ChannelConfig>,
) -> Option<ConfigMap> {
    let global = config_store.get_step_config(group).await;
    merge_step_config(global.as_ref(), channel.and_then(|c| c.override_for(group)))
}

/// Creates [`PipelineContext`]s and the [`StepContext`] views steps receive.
#[derive(Clone)]
pub struct ContextFactory {
    config_store: Arc<dyn StepConfigStore>,
    services: Arc<ServiceRegistry>,
    event_sink: Arc<dyn EventSink>,
}

impl ContextFactory {
    /// Creates a factory.
    #[must_use]
    pub fn new(config_store: Arc<dyn StepConfigStore>, services: Arc<ServiceRegistry>) -> Self {
        Self {
            config_store,
            services,
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink attached to created contexts.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the service registry.
    #[must_use]
    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Builds the context of one request.
    ///
    /// The request's prepare callback must already have been taken; it is
    /// owned by the executor, not the context.
    #[must_use]
    pub fn create(
        &self,
        run_id: Uuid,
        request: GenerationRequest,
        channel_id: Option<u64>,
        channel: Option<ChannelConfig>,
    ) -> Arc<PipelineContext> {
        let GenerationRequest {
            prompt,
            files,
            parameters,
            uid,
            session,
            ..
        } = request;

        Arc::new(
            PipelineContext::new(run_id, prompt)
                .with_files(files)
                .with_parameters(parameters)
                .with_channel(channel_id, channel)
                .with_uid(uid)
                .with_session(session)
                .with_event_sink(self.event_sink.clone()),
        )
    }

    /// Builds the view handed to one step.
    #[must_use]
    pub fn step_context(&self, pipeline: &Arc<PipelineContext>, step: &StepDefinition) -> StepContext {
        StepContext::new(
            pipeline.clone(),
            step.name.clone(),
            step.effective_config_group(),
            self.config_store.clone(),
            self.services.clone(),
        )
    }
}

impl std::fmt::Debug for ContextFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextFactory")
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}
