//! Contracts for the collaborators the scheduler depends on.
//!
//! Channel storage, global step configuration and the per-channel
//! enable/disable predicate live outside this crate. In-memory
//! implementations are provided for composition roots and tests.

use crate::context::{ChannelConfig, ConfigMap};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// Resolves channel configuration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Looks a channel up by id.
    async fn get_channel(&self, id: u64) -> Option<ChannelConfig>;

    /// Looks a channel up by its unique name.
    async fn find_channel_by_name(&self, name: &str) -> Option<ChannelConfig>;
}

/// Resolves the global (channel-independent) configuration of a step group.
#[async_trait]
pub trait StepConfigStore: Send + Sync {
    /// Returns the raw global config for a config group.
    async fn get_step_config(&self, group: &str) -> Option<ConfigMap>;
}

/// Decides whether a step runs for a channel.
#[async_trait]
pub trait StepGate: Send + Sync {
    /// Returns true if `step` should run for `channel`.
    async fn is_step_enabled(&self, step: &str, channel: Option<&ChannelConfig>) -> bool;
}

/// Channels kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryChannelStore {
    channels: RwLock<HashMap<u64, ChannelConfig>>,
}

impl InMemoryChannelStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a channel.
    #[must_use]
    pub fn with_channel(self, channel: ChannelConfig) -> Self {
        self.insert(channel);
        self
    }

    /// Inserts or replaces a channel.
    pub fn insert(&self, channel: ChannelConfig) {
        self.channels.write().insert(channel.id, channel);
    }

    /// Returns the number of channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    /// Returns true if no channel is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}

#[async_trait]
impl ChannelStore for InMemoryChannelStore {
    async fn get_channel(&self, id: u64) -> Option<ChannelConfig> {
        self.channels.read().get(&id).cloned()
    }

    async fn find_channel_by_name(&self, name: &str) -> Option<ChannelConfig> {
        self.channels
            .read()
            .values()
            .find(|channel| channel.name == name)
            .cloned()
    }
}

/// Global step configuration kept in memory, keyed by config group.
#[derive(Debug, Default)]
pub struct InMemoryStepConfigStore {
    groups: RwLock<HashMap<String, ConfigMap>>,
}

impl InMemoryStepConfigStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a group's config.
    pub fn set_group(&self, group: impl Into<String>, config: ConfigMap) {
        self.groups.write().insert(group.into(), config);
    }

    /// Sets one key of a group's config.
    pub fn set_value(&self, group: impl Into<String>, key: impl Into<String>, value: serde_json::Value) {
        self.groups
            .write()
            .entry(group.into())
            .or_default()
            .insert(key.into(), value);
    }

    /// Builder form of [`Self::set_value`].
    #[must_use]
    pub fn with_value(
        self,
        group: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.set_value(group, key, value);
        self
    }
}

#[async_trait]
impl StepConfigStore for InMemoryStepConfigStore {
    async fn get_step_config(&self, group: &str) -> Option<ConfigMap> {
        self.groups.read().get(group).cloned()
    }
}

/// The default gate: a global deny list, overridden per channel.
///
/// A channel's explicit toggle (`steps` map in any override group) wins.
/// Without one, a step runs unless it is globally disabled.
#[derive(Debug, Default)]
pub struct ChannelOverrideGate {
    disabled: RwLock<HashSet<String>>,
}

impl ChannelOverrideGate {
    /// Creates a gate that enables everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a gate with globally disabled steps.
    #[must_use]
    pub fn with_disabled<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            disabled: RwLock::new(steps.into_iter().map(Into::into).collect()),
        }
    }

    /// Disables a step globally.
    pub fn disable(&self, step: impl Into<String>) {
        self.disabled.write().insert(step.into());
    }

    /// Re-enables a globally disabled step.
    pub fn enable(&self, step: &str) {
        self.disabled.write().remove(step);
    }
}

#[async_trait]
impl StepGate for ChannelOverrideGate {
    async fn is_step_enabled(&self, step: &str, channel: Option<&ChannelConfig>) -> bool {
        if let Some(toggle) = channel.and_then(|c| c.step_toggle(step)) {
            return toggle;
        }
        !self.disabled.read().contains(step)
    }
}
