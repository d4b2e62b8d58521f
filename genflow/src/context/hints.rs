//! User-facing hints accumulated during a run.

use serde::{Deserialize, Serialize};

/// When a hint should be shown relative to the generated output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintPosition {
    /// Shown before generation starts (e.g. "charged 5 points").
    Before,
    /// Shown alongside the final result.
    After,
}

impl Default for HintPosition {
    fn default() -> Self {
        Self::After
    }
}

/// The two ordered hint lists of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserHints {
    /// Hints for the "before" display point.
    #[serde(default)]
    pub before: Vec<String>,
    /// Hints for the "after" display point.
    #[serde(default)]
    pub after: Vec<String>,
}

impl UserHints {
    /// Appends a hint.
    pub fn push(&mut self, position: HintPosition, hint: impl Into<String>) {
        match position {
            HintPosition::Before => self.before.push(hint.into()),
            HintPosition::After => self.after.push(hint.into()),
        }
    }

    /// Returns true if both lists are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}
