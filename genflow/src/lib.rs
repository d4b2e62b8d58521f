//! # Genflow
//!
//! A dependency-ordered, concurrent step scheduler for generation requests.
//!
//! Genflow runs a set of independently registered steps against one
//! request. It provides:
//!
//! - **Declarative ordering**: steps name the steps they run `after` or
//!   `before`; the graph builder layers them into levels
//! - **Level concurrency**: steps of one level run concurrently, and the
//!   first stop or error in a level skips the siblings that have not started
//! - **Guaranteed finalize**: `finalize` steps always run after the main
//!   walk, whatever happened
//! - **Per-channel configuration**: global step config merged with channel
//!   overrides, and per-channel enable/disable
//! - **Event-driven observability**: pipeline and step transitions reported
//!   to an injected event sink, plus `tracing` spans and logs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use genflow::prelude::*;
//!
//! let pipeline = PipelineBuilder::new("images")
//!     .with_service(BILLING_SERVICE, ledger)
//!     .steps(billing_steps())?
//!     .step(StepDefinition::new("generate", Arc::new(Generate)).after("billing-prepare"))?
//!     .build()?;
//!
//! let result = pipeline
//!     .execute(GenerationRequest::new("flux", "a cat").with_uid(42))
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod services;
pub mod steps;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{LoggingConfig, PipelineConfig};
    pub use crate::context::{
        ChannelConfig, ChannelRef, ConfigMap, GenerationRequest, GenerationResult,
        HintPosition, InputFile, PipelineContext, StepContext, UserHints,
    };
    pub use crate::core::{AssetKind, OutputAsset, StepPhase, StepRecord, StepSignal, StepStatus};
    pub use crate::errors::{
        ContractErrorInfo, CycleDetectedError, PipelineError, PipelineValidationError,
        StoreConflictError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        ChannelOverrideGate, ChannelStore, DependencyGraph, GenerationPipeline,
        InMemoryChannelStore, InMemoryStepConfigStore, PipelineBuilder, StepConfigStore,
        StepDefinition, StepGate, StepRegistry,
    };
    pub use crate::services::ServiceRegistry;
    pub use crate::steps::{
        billing_steps, AsyncFnStep, BalanceLedger, FnStep, NoOpStep, Step, BILLING_SERVICE,
    };
}
