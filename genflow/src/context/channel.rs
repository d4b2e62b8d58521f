//! Channel configuration and channel references.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Override key that stores per-channel step toggles instead of step config.
///
/// Inside any override group, `steps` maps step names to `true`/`false`.
/// It is never merged into a step's effective configuration.
pub const STEP_TOGGLE_KEY: &str = "steps";

/// A JSON object, the shape of all step configuration.
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

/// A generation target (backend + settings) as resolved from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Numeric channel id.
    pub id: u64,
    /// Unique channel name.
    pub name: String,
    /// The connector (backend) this channel talks to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<String>,
    /// Whether the channel accepts requests.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Per config-group overrides of global step configuration.
    #[serde(default)]
    pub step_overrides: HashMap<String, ConfigMap>,
}

fn default_enabled() -> bool {
    true
}

impl ChannelConfig {
    /// Creates a channel with no overrides.
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            connector: None,
            enabled: true,
            step_overrides: HashMap::new(),
        }
    }

    /// Sets the connector.
    #[must_use]
    pub fn with_connector(mut self, connector: impl Into<String>) -> Self {
        self.connector = Some(connector.into());
        self
    }

    /// Turns the whole channel on or off.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets one override value for a config group.
    #[must_use]
    pub fn with_override(
        mut self,
        group: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.step_overrides
            .entry(group.into())
            .or_default()
            .insert(key.into(), value);
        self
    }

    /// Turns a step on or off for this channel.
    #[must_use]
    pub fn with_step_toggle(
        mut self,
        group: impl Into<String>,
        step: impl Into<String>,
        enabled: bool,
    ) -> Self {
        let overrides = self.step_overrides.entry(group.into()).or_default();
        let toggles = overrides
            .entry(STEP_TOGGLE_KEY.to_string())
            .or_insert_with(|| serde_json::Value::Object(ConfigMap::new()));
        if let serde_json::Value::Object(map) = toggles {
            map.insert(step.into(), serde_json::Value::Bool(enabled));
        }
        self
    }

    /// Returns the raw override object for a config group.
    #[must_use]
    pub fn override_for(&self, group: &str) -> Option<&ConfigMap> {
        self.step_overrides.get(group)
    }

    /// Returns the channel's explicit toggle for a step, if any group sets one.
    #[must_use]
    pub fn step_toggle(&self, step: &str) -> Option<bool> {
        let mut groups: Vec<_> = self.step_overrides.iter().collect();
        groups.sort_by(|a, b| a.0.cmp(b.0));

        groups.into_iter().find_map(|(_, overrides)| {
            overrides
                .get(STEP_TOGGLE_KEY)
                .and_then(|toggles| toggles.get(step))
                .and_then(serde_json::Value::as_bool)
        })
    }
}

/// How a request names its target channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelRef {
    /// By numeric id.
    Id(u64),
    /// By unique name.
    Name(String),
}

impl From<u64> for ChannelRef {
    fn from(id: u64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for ChannelRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for ChannelRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::Name(name) => write!(f, "'{name}'"),
        }
    }
}
