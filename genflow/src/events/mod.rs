//! Event sink system for observability.
//!
//! The executor reports pipeline and step transitions to an injected
//! [`EventSink`]. Every payload carries `run_id` and, when known,
//! `channel_id`; step events also carry `step` and `phase`.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by the executor.
pub mod names {
    /// A run started.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// The prepare level settled and the prepare callback (if any) ran.
    pub const PIPELINE_PREPARED: &str = "pipeline.prepared";
    /// A run finished without error (possibly stopped early).
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// A run finished with an error.
    pub const PIPELINE_FAILED: &str = "pipeline.failed";
    /// A step body is about to run.
    pub const STEP_STARTED: &str = "step.started";
    /// A step returned `Continue`.
    pub const STEP_COMPLETED: &str = "step.completed";
    /// A step returned `Stop`.
    pub const STEP_STOPPED: &str = "step.stopped";
    /// A step returned `Error` or panicked.
    pub const STEP_FAILED: &str = "step.failed";
    /// A step was superseded by a sibling's stop or error before it started.
    pub const STEP_SKIPPED: &str = "step.skipped";
    /// A step is turned off for the request's channel.
    pub const STEP_DISABLED: &str = "step.disabled";
    /// A finalize step failed. Never affects the result.
    pub const FINALIZE_FAILED: &str = "finalize.failed";
}
