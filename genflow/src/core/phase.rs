//! Step phase tags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The coarse lifecycle phase a step belongs to.
///
/// Phases are descriptive: ordering comes from `after`/`before` hints only.
/// The executor special-cases [`StepPhase::Finalize`] (always run last) and
/// [`StepPhase::Prepare`] (triggers the prepare-complete callback).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepPhase {
    /// Pre-flight checks and charges.
    Prepare,
    /// Prompt and parameter transformation before a backend is called.
    PreRequest,
    /// Post-processing of produced assets.
    PostRequest,
    /// Always-run settlement and cleanup.
    Finalize,
}

impl Default for StepPhase {
    fn default() -> Self {
        Self::PreRequest
    }
}

impl StepPhase {
    /// All phases in lifecycle order.
    pub const ALL: [Self; 4] = [
        Self::Prepare,
        Self::PreRequest,
        Self::PostRequest,
        Self::Finalize,
    ];

    /// Returns the wire name of the phase.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::PreRequest => "pre-request",
            Self::PostRequest => "post-request",
            Self::Finalize => "finalize",
        }
    }

    /// Returns true for the deferred, always-run phase.
    #[must_use]
    pub const fn is_finalize(self) -> bool {
        matches!(self, Self::Finalize)
    }
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| format!("unknown step phase '{s}'"))
    }
}
