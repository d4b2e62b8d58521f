//! Core domain model types for genflow.
//!
//! This module contains the fundamental types used throughout the scheduler:
//! - Step phases and signals
//! - Per-step execution records
//! - Output assets

mod asset;
mod phase;
mod record;
mod signal;

pub use asset::{AssetKind, OutputAsset};
pub use phase::StepPhase;
pub use record::StepRecord;
pub use signal::{StepSignal, StepStatus};
