//! Mutable execution contexts for a generation run.

use super::{
    ChannelConfig, ConfigMap, HintPosition, InputFile, ScratchStore, SessionHandle, UserHints,
};
use crate::core::OutputAsset;
use crate::errors::StoreConflictError;
use crate::events::{EventSink, NoOpEventSink};
use crate::pipeline::StepConfigStore;
use crate::services::ServiceRegistry;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// The context of one generation request.
///
/// Created by the [`ContextFactory`](super::ContextFactory), owned by the
/// executor and shared with every step of the run. Locks are held only for
/// the duration of a single read or write.
pub struct PipelineContext {
    run_id: Uuid,
    original_prompt: String,
    files: Vec<InputFile>,
    parameters: ConfigMap,
    channel_id: Option<u64>,
    channel: Option<ChannelConfig>,
    uid: Option<u64>,
    session: Option<SessionHandle>,

    prompt: RwLock<String>,
    output: RwLock<Option<Vec<OutputAsset>>>,
    store: ScratchStore,
    diagnostics: RwLock<BTreeMap<String, serde_json::Value>>,
    hints: RwLock<UserHints>,
    error: RwLock<Option<String>>,

    event_sink: Arc<dyn EventSink>,
}

impl PipelineContext {
    /// Creates a context for a prompt with no channel.
    #[must_use]
    pub fn new(run_id: Uuid, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        Self {
            run_id,
            original_prompt: prompt.clone(),
            files: Vec::new(),
            parameters: ConfigMap::new(),
            channel_id: None,
            channel: None,
            uid: None,
            session: None,
            prompt: RwLock::new(prompt),
            output: RwLock::new(None),
            store: ScratchStore::new(),
            diagnostics: RwLock::new(BTreeMap::new()),
            hints: RwLock::new(UserHints::default()),
            error: RwLock::new(None),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the input files.
    #[must_use]
    pub fn with_files(mut self, files: Vec<InputFile>) -> Self {
        self.files = files;
        self
    }

    /// Sets the request parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: ConfigMap) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets the resolved channel. The id is kept even if no config exists.
    #[must_use]
    pub fn with_channel(mut self, channel_id: Option<u64>, channel: Option<ChannelConfig>) -> Self {
        self.channel_id = channel_id.or_else(|| channel.as_ref().map(|c| c.id));
        self.channel = channel;
        self
    }

    /// Sets the caller's user id.
    #[must_use]
    pub fn with_uid(mut self, uid: Option<u64>) -> Self {
        self.uid = uid;
        self
    }

    /// Sets the session handle.
    #[must_use]
    pub fn with_session(mut self, session: Option<SessionHandle>) -> Self {
        self.session = session;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the prompt as submitted.
    #[must_use]
    pub fn original_prompt(&self) -> &str {
        &self.original_prompt
    }

    /// Returns the input files.
    #[must_use]
    pub fn files(&self) -> &[InputFile] {
        &self.files
    }

    /// Returns the request parameters.
    #[must_use]
    pub fn parameters(&self) -> &ConfigMap {
        &self.parameters
    }

    /// Returns the channel id.
    #[must_use]
    pub fn channel_id(&self) -> Option<u64> {
        self.channel_id
    }

    /// Returns the resolved channel config.
    #[must_use]
    pub fn channel(&self) -> Option<&ChannelConfig> {
        self.channel.as_ref()
    }

    /// Returns the caller's user id.
    #[must_use]
    pub fn uid(&self) -> Option<u64> {
        self.uid
    }

    /// Returns the session handle.
    #[must_use]
    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    /// Returns the current prompt.
    #[must_use]
    pub fn prompt(&self) -> String {
        self.prompt.read().clone()
    }

    /// Rewrites the current prompt.
    pub fn set_prompt(&self, prompt: impl Into<String>) {
        *self.prompt.write() = prompt.into();
    }

    /// Returns the produced assets, `None` until the first write.
    #[must_use]
    pub fn output(&self) -> Option<Vec<OutputAsset>> {
        self.output.read().clone()
    }

    /// Replaces the produced assets.
    pub fn set_output(&self, output: Vec<OutputAsset>) {
        *self.output.write() = Some(output);
    }

    /// Appends a produced asset.
    pub fn push_output(&self, asset: OutputAsset) {
        self.output.write().get_or_insert_with(Vec::new).push(asset);
    }

    /// Returns true if at least one asset was produced.
    #[must_use]
    pub fn has_output(&self) -> bool {
        self.output.read().as_ref().is_some_and(|o| !o.is_empty())
    }

    /// Returns the scratch store.
    #[must_use]
    pub fn store(&self) -> &ScratchStore {
        &self.store
    }

    /// Records a diagnostic payload for a step, replacing any earlier one.
    pub fn record_diagnostic(&self, step: impl Into<String>, value: serde_json::Value) {
        self.diagnostics.write().insert(step.into(), value);
    }

    /// Returns all diagnostics.
    #[must_use]
    pub fn diagnostics(&self) -> BTreeMap<String, serde_json::Value> {
        self.diagnostics.read().clone()
    }

    /// Appends a user-facing hint.
    pub fn add_hint(&self, hint: impl Into<String>, position: HintPosition) {
        self.hints.write().push(position, hint);
    }

    /// Returns a copy of the hints.
    #[must_use]
    pub fn hints(&self) -> UserHints {
        self.hints.read().clone()
    }

    /// Returns the "before" hints.
    #[must_use]
    pub fn before_hints(&self) -> Vec<String> {
        self.hints.read().before.clone()
    }

    pub(crate) fn clear_before_hints(&self) {
        self.hints.write().before.clear();
    }

    /// Returns the recorded pipeline error.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.error.read().clone()
    }

    /// Records the pipeline error. The first error is kept.
    pub(crate) fn set_error(&self, message: impl Into<String>) {
        let mut error = self.error.write();
        if error.is_none() {
            *error = Some(message.into());
        }
    }

    /// Returns the event sink.
    #[must_use]
    pub fn event_sink(&self) -> &Arc<dyn EventSink> {
        &self.event_sink
    }

    /// Emits an event enriched with the run id and channel id, waiting for
    /// the sink.
    pub async fn emit_event(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.event_sink
            .emit(event_type, Some(self.event_payload(data)))
            .await;
    }

    /// Emits an event enriched with the run id and channel id without
    /// waiting.
    pub fn try_emit_event(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.event_sink
            .try_emit(event_type, Some(self.event_payload(data)));
    }

    fn event_payload(&self, data: Option<serde_json::Value>) -> serde_json::Value {
        let mut payload = match data {
            Some(serde_json::Value::Object(map)) => map,
            Some(other) => {
                let mut map = ConfigMap::new();
                map.insert("data".to_string(), other);
                map
            }
            None => ConfigMap::new(),
        };
        payload.insert(
            "run_id".to_string(),
            serde_json::Value::String(self.run_id.to_string()),
        );
        if let Some(channel_id) = self.channel_id {
            payload.insert("channel_id".to_string(), channel_id.into());
        }
        serde_json::Value::Object(payload)
    }
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("run_id", &self.run_id)
            .field("channel_id", &self.channel_id)
            .field("uid", &self.uid)
            .field("prompt", &*self.prompt.read())
            .field("store_keys", &self.store.len())
            .field("error", &*self.error.read())
            .finish_non_exhaustive()
    }
}

/// The view of the run handed to one step.
///
/// Cheap to clone. Configuration and services are injected by the
/// [`ContextFactory`](super::ContextFactory); a step never reaches for
/// global state.
#[derive(Clone)]
pub struct StepContext {
    pipeline: Arc<PipelineContext>,
    step_name: String,
    config_group: String,
    config_store: Arc<dyn StepConfigStore>,
    services: Arc<ServiceRegistry>,
}

impl StepContext {
    pub(crate) fn new(
        pipeline: Arc<PipelineContext>,
        step_name: impl Into<String>,
        config_group: impl Into<String>,
        config_store: Arc<dyn StepConfigStore>,
        services: Arc<ServiceRegistry>,
    ) -> Self {
        Self {
            pipeline,
            step_name: step_name.into(),
            config_group: config_group.into(),
            config_store,
            services,
        }
    }

    /// Returns the shared pipeline context.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<PipelineContext> {
        &self.pipeline
    }

    /// Returns the name of the step this view belongs to.
    #[must_use]
    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    /// Returns the config group the step reads.
    #[must_use]
    pub fn config_group(&self) -> &str {
        &self.config_group
    }

    /// Returns the effective config of the step's group.
    ///
    /// Global config overlaid by the channel override; `None` when neither
    /// layer exists.
    pub async fn config(&self) -> Option<ConfigMap> {
        let global = self.config_store.get_step_config(&self.config_group).await;
        super::merge_step_config(
            global.as_ref(),
            self.pipeline
                .channel()
                .and_then(|c| c.override_for(&self.config_group)),
        )
    }

    /// Returns the effective config deserialized into `T`.
    ///
    /// A missing config deserializes from an empty object, so `T` with
    /// `#[serde(default)]` fields always resolves.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the merged config does not fit `T`.
    pub async fn config_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let config = self.config().await.unwrap_or_default();
        serde_json::from_value(serde_json::Value::Object(config))
    }

    /// Appends a user-facing hint.
    pub fn add_hint(&self, hint: impl Into<String>, position: HintPosition) {
        self.pipeline.add_hint(hint, position);
    }

    /// Records a diagnostic under this step's name.
    pub fn record_diagnostic(&self, value: serde_json::Value) {
        self.pipeline.record_diagnostic(self.step_name.clone(), value);
    }

    /// Returns every step's diagnostics.
    #[must_use]
    pub fn diagnostics(&self) -> BTreeMap<String, serde_json::Value> {
        self.pipeline.diagnostics()
    }

    /// Resolves a registered service.
    #[must_use]
    pub fn service<T>(&self, name: &str) -> Option<T>
    where
        T: std::any::Any + Send + Sync + Clone,
    {
        self.services.resolve(name)
    }

    /// Reads a scratch store value.
    #[must_use]
    pub fn store_get(&self, key: &str) -> Option<serde_json::Value> {
        self.pipeline.store().get(key)
    }

    /// Writes a scratch store value owned by this step.
    ///
    /// # Errors
    ///
    /// Returns `StoreConflictError` if another step owns the key.
    pub fn store_set(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), StoreConflictError> {
        self.pipeline.store().set(&self.step_name, key, value)
    }

    /// Returns the current prompt.
    #[must_use]
    pub fn prompt(&self) -> String {
        self.pipeline.prompt()
    }

    /// Rewrites the current prompt.
    pub fn set_prompt(&self, prompt: impl Into<String>) {
        self.pipeline.set_prompt(prompt);
    }

    /// Returns the produced assets.
    #[must_use]
    pub fn output(&self) -> Option<Vec<OutputAsset>> {
        self.pipeline.output()
    }

    /// Replaces the produced assets.
    pub fn set_output(&self, output: Vec<OutputAsset>) {
        self.pipeline.set_output(output);
    }

    /// Appends a produced asset.
    pub fn push_output(&self, asset: OutputAsset) {
        self.pipeline.push_output(asset);
    }

    /// Returns true if at least one asset was produced.
    #[must_use]
    pub fn has_output(&self) -> bool {
        self.pipeline.has_output()
    }

    /// Returns the caller's user id.
    #[must_use]
    pub fn uid(&self) -> Option<u64> {
        self.pipeline.uid()
    }

    /// Returns the resolved channel.
    #[must_use]
    pub fn channel(&self) -> Option<&ChannelConfig> {
        self.pipeline.channel()
    }

    /// Returns the request parameters.
    #[must_use]
    pub fn parameters(&self) -> &ConfigMap {
        self.pipeline.parameters()
    }

    /// Returns the input files.
    #[must_use]
    pub fn files(&self) -> &[InputFile] {
        self.pipeline.files()
    }

    /// Returns the error recorded by the main walk, if any.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.pipeline.error()
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("step_name", &self.step_name)
            .field("config_group", &self.config_group)
            .field("run_id", &self.pipeline.run_id())
            .finish_non_exhaustive()
    }
}
