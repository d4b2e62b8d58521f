//! Step signals and per-step execution status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a step tells the scheduler when it finishes.
///
/// The scheduler, not the step, decides what runs next: a step can only
/// let the pipeline go on, halt it, or fail it.
#[derive(Debug)]
pub enum StepSignal {
    /// The step completed normally.
    Continue,
    /// Halt the pipeline here without treating it as a failure.
    Stop,
    /// The step failed; the pipeline fails with this cause.
    Error(anyhow::Error),
}

impl StepSignal {
    /// The "do work, then proceed" signal.
    #[must_use]
    pub const fn proceed() -> Self {
        Self::Continue
    }

    /// Creates an error signal from a message.
    #[must_use]
    pub fn error(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Error(anyhow::Error::msg(message))
    }

    /// Creates an error signal from any error type.
    #[must_use]
    pub fn fail(err: impl Into<anyhow::Error>) -> Self {
        Self::Error(err.into())
    }

    /// Returns true for [`StepSignal::Continue`].
    #[must_use]
    pub const fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }

    /// Returns true for [`StepSignal::Stop`].
    #[must_use]
    pub const fn is_stop(&self) -> bool {
        matches!(self, Self::Stop)
    }

    /// Returns true for [`StepSignal::Error`].
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Returns the causal message of an error signal.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Error(err) => Some(err.to_string()),
            _ => None,
        }
    }

    /// The status recorded for a step that returned this signal.
    #[must_use]
    pub const fn status(&self) -> StepStatus {
        match self {
            Self::Continue => StepStatus::Completed,
            Self::Stop => StepStatus::Stopped,
            Self::Error(_) => StepStatus::Failed,
        }
    }
}

impl<E> From<Result<(), E>> for StepSignal
where
    E: Into<anyhow::Error>,
{
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::Continue,
            Err(err) => Self::Error(err.into()),
        }
    }
}

/// The recorded outcome of one step in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Returned [`StepSignal::Continue`].
    Completed,
    /// Returned [`StepSignal::Stop`].
    Stopped,
    /// Returned [`StepSignal::Error`] or panicked.
    Failed,
    /// Not started because a sibling stopped or failed the level.
    Skipped,
    /// Filtered out by the step gate for this channel.
    Disabled,
}

impl StepStatus {
    /// Returns true if the step body was invoked.
    #[must_use]
    pub const fn was_invoked(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}
