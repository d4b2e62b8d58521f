//! Request, context and result types for a generation run.
//!
//! This module provides:
//! - The caller-facing request and result
//! - The per-request pipeline context and the per-step view
//! - Channel configuration, hints and the scratch store

mod channel;
mod execution;
mod factory;
mod hints;
mod request;
mod store;

pub use channel::{ChannelConfig, ChannelRef, ConfigMap, STEP_TOGGLE_KEY};
pub use execution::{PipelineContext, StepContext};
pub use factory::{merge_step_config, resolve_step_config, ContextFactory};
pub use hints::{HintPosition, UserHints};
pub use request::{
    GenerationRequest, GenerationResult, InputFile, PrepareCallback, SessionHandle,
};
pub use store::ScratchStore;
