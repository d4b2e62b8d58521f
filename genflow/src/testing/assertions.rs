//! Test assertions for generation results.

use crate::context::GenerationResult;
use crate::core::StepStatus;

/// Asserts that the run succeeded.
pub fn assert_result_succeeded(result: &GenerationResult) {
    assert!(
        result.success,
        "Expected success, got error: {:?}",
        result.error
    );
}

/// Asserts that the run failed with an error containing `needle`.
pub fn assert_result_failed_with(result: &GenerationResult, needle: &str) {
    assert!(!result.success, "Expected failure, but the run succeeded");
    let error = result.error.as_deref().unwrap_or_default();
    assert!(
        error.contains(needle),
        "Expected error containing '{}', got '{}'",
        needle,
        error
    );
}

/// Asserts the recorded status of a step.
pub fn assert_step_status(result: &GenerationResult, step: &str, expected: StepStatus) {
    let actual = result.step_status(step);
    assert_eq!(
        actual,
        Some(expected),
        "Expected step '{}' to be {:?}, got {:?}",
        step,
        expected,
        actual
    );
}

/// Asserts that a step has no record (it was never scheduled).
pub fn assert_step_absent(result: &GenerationResult, step: &str) {
    assert!(
        result.step(step).is_none(),
        "Expected no record for step '{}', got {:?}",
        step,
        result.step(step)
    );
}

/// Asserts that step `first` settled before step `second`.
pub fn assert_settled_before(result: &GenerationResult, first: &str, second: &str) {
    let position = |name: &str| result.steps.iter().position(|r| r.name == name);
    match (position(first), position(second)) {
        (Some(a), Some(b)) => assert!(
            a < b,
            "Expected '{}' to settle before '{}', order: {:?}",
            first,
            second,
            result.steps.iter().map(|r| r.name.as_str()).collect::<Vec<_>>()
        ),
        other => panic!("Missing step record(s) for '{first}'/'{second}': {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{StepPhase, StepRecord};
    use uuid::Uuid;

    fn result_with(records: Vec<StepRecord>) -> GenerationResult {
        let mut result = GenerationResult::rejected(Uuid::nil(), "boom: step failed", 1.0);
        result.steps = records;
        result
    }

    #[test]
    fn test_assertions_pass() {
        let result = result_with(vec![
            StepRecord::disabled("a", StepPhase::Prepare),
            StepRecord::skipped("b", StepPhase::PreRequest, None),
        ]);

        assert_result_failed_with(&result, "boom");
        assert_step_status(&result, "a", StepStatus::Disabled);
        assert_step_status(&result, "b", StepStatus::Skipped);
        assert_step_absent(&result, "c");
        assert_settled_before(&result, "a", "b");
    }

    #[test]
    #[should_panic(expected = "Expected success")]
    fn test_assert_succeeded_panics() {
        assert_result_succeeded(&result_with(Vec::new()));
    }
}
