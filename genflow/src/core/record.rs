//! Per-step execution records.

use super::{StepPhase, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to one step during one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step name.
    pub name: String,
    /// Step phase.
    pub phase: StepPhase,
    /// Final status.
    pub status: StepStatus,
    /// Error message for failed steps, skip reason for skipped ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the step body started, if it was invoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the step body returned, if it was invoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Wall-clock time spent in the step body.
    pub duration_ms: f64,
}

impl StepRecord {
    /// Record for a step whose body ran.
    #[must_use]
    pub fn invoked(
        name: impl Into<String>,
        phase: StepPhase,
        status: StepStatus,
        message: Option<String>,
        started_at: DateTime<Utc>,
        duration_ms: f64,
    ) -> Self {
        Self {
            name: name.into(),
            phase,
            status,
            message,
            started_at: Some(started_at),
            ended_at: Some(Utc::now()),
            duration_ms,
        }
    }

    /// Record for a step that was never started.
    #[must_use]
    pub fn skipped(name: impl Into<String>, phase: StepPhase, reason: Option<String>) -> Self {
        Self::not_invoked(name, phase, StepStatus::Skipped, reason)
    }

    /// Record for a step turned off for the request's channel.
    #[must_use]
    pub fn disabled(name: impl Into<String>, phase: StepPhase) -> Self {
        Self::not_invoked(name, phase, StepStatus::Disabled, None)
    }

    fn not_invoked(
        name: impl Into<String>,
        phase: StepPhase,
        status: StepStatus,
        message: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            phase,
            status,
            message,
            started_at: None,
            ended_at: None,
            duration_ms: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoked_record_has_timestamps() {
        let started = Utc::now();
        let record = StepRecord::invoked(
            "upload",
            StepPhase::PostRequest,
            StepStatus::Completed,
            None,
            started,
            12.5,
        );

        assert_eq!(record.started_at, Some(started));
        assert!(record.ended_at.unwrap() >= started);
        assert!((record.duration_ms - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_skipped_record() {
        let record = StepRecord::skipped("c", StepPhase::PreRequest, Some("stopped by b".into()));
        assert_eq!(record.status, StepStatus::Skipped);
        assert!(record.started_at.is_none());
        assert_eq!(record.message.as_deref(), Some("stopped by b"));
    }

    #[test]
    fn test_disabled_record_serialization() {
        let json = serde_json::to_value(StepRecord::disabled("nsfw", StepPhase::Prepare)).unwrap();
        assert_eq!(json["status"], "disabled");
        assert_eq!(json["phase"], "prepare");
        assert!(json.get("started_at").is_none());
    }
}
