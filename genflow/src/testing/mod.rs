//! Testing utilities for generation pipelines.
//!
//! This module provides:
//! - Scriptable mock steps and an execution journal
//! - A fixture wiring a channel, config and services together
//! - Assertions over generation results

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_result_failed_with, assert_result_succeeded, assert_settled_before,
    assert_step_absent, assert_step_status,
};
pub use fixtures::{TestFixture, TEST_CHANNEL_ID, TEST_CHANNEL_NAME};
pub use mocks::{ExecutionJournal, MockBehavior, MockStep};
