//! End-to-end tests for pipeline execution.

use crate::config::PipelineConfig;
use crate::context::{GenerationRequest, HintPosition, StepContext};
use crate::core::{OutputAsset, StepPhase, StepSignal, StepStatus};
use crate::errors::PipelineError;
use crate::events::{names, CollectingEventSink};
use crate::pipeline::{InMemoryChannelStore, PipelineBuilder, StepDefinition};
use crate::steps::{
    billing_steps, AsyncFnStep, BalanceLedger, BillingPrepareStep, InMemoryLedger,
    BILLING_GROUP, BILLING_SERVICE,
};
use crate::testing::{
    assert_result_failed_with, assert_result_succeeded, assert_settled_before,
    assert_step_absent, assert_step_status, ExecutionJournal, MockStep, TestFixture,
    TEST_CHANNEL_NAME,
};
use futures::FutureExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn declare(step: &Arc<MockStep>) -> StepDefinition {
    StepDefinition::new(step.name(), step.clone())
}

fn mock(step: MockStep) -> Arc<MockStep> {
    Arc::new(step)
}

fn counting_callback(
    request: GenerationRequest,
    calls: &Arc<AtomicUsize>,
    seen: &Arc<parking_lot::Mutex<Vec<String>>>,
) -> GenerationRequest {
    let calls = calls.clone();
    let seen = seen.clone();
    request.on_prepare_complete(move |hints| async move {
        calls.fetch_add(1, Ordering::SeqCst);
        seen.lock().extend(hints);
        Ok(())
    })
}

#[tokio::test]
async fn test_levels_run_in_order_then_finalize() {
    let fixture = TestFixture::new();
    let journal = ExecutionJournal::new();
    let a = mock(MockStep::new("a").with_journal(journal.clone()));
    let b = mock(MockStep::new("b").with_journal(journal.clone()));
    let f = mock(MockStep::new("f").with_journal(journal.clone()));

    let pipeline = fixture
        .pipeline([
            declare(&a),
            declare(&b).after("a"),
            declare(&f).with_phase(StepPhase::Finalize),
        ])
        .unwrap();

    let plan = pipeline.plan().unwrap();
    assert_eq!(plan.ordinary.len(), 2);
    assert_eq!(plan.ordinary[0].names(), vec!["a"]);
    assert_eq!(plan.ordinary[1].names(), vec!["b"]);
    assert_eq!(plan.finalize[0].names(), vec!["f"]);

    let result = pipeline.execute(fixture.request()).await.unwrap();

    assert_result_succeeded(&result);
    assert_eq!(journal.started(), vec!["a", "b", "f"]);
    assert_eq!(
        journal.entries(),
        vec!["start:a", "end:a", "start:b", "end:b", "start:f", "end:f"]
    );
    assert_settled_before(&result, "b", "f");
    assert!(result.output.is_empty());
    assert!(result.hints.is_none());
}

#[tokio::test]
async fn test_error_skips_later_levels_but_runs_finalize() {
    let fixture = TestFixture::new();
    let a = mock(MockStep::failing("a", "insufficient balance"));
    let b = mock(MockStep::new("b"));
    let f = mock(MockStep::new("f"));

    let pipeline = fixture
        .pipeline([
            declare(&a),
            declare(&b).after("a"),
            declare(&f).with_phase(StepPhase::Finalize),
        ])
        .unwrap();
    let result = pipeline.execute(fixture.request()).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("insufficient balance"));
    assert_eq!(b.call_count(), 0);
    assert_eq!(f.call_count(), 1);
    assert_eq!(f.seen_errors(), vec![Some("insufficient balance".to_string())]);
    assert_step_status(&result, "a", StepStatus::Failed);
    assert_step_absent(&result, "b");
    assert_step_status(&result, "f", StepStatus::Completed);
}

#[tokio::test]
async fn test_independent_prepare_steps_share_a_level() {
    let fixture = TestFixture::new();
    let journal = ExecutionJournal::new();
    let p1 = mock(
        MockStep::new("p1")
            .with_delay(Duration::from_millis(20))
            .with_journal(journal.clone()),
    );
    let p2 = mock(
        MockStep::new("p2")
            .with_delay(Duration::from_millis(20))
            .with_journal(journal.clone()),
    );
    let pipeline = fixture
        .pipeline([
            declare(&p1).with_phase(StepPhase::Prepare),
            declare(&p2).with_phase(StepPhase::Prepare),
        ])
        .unwrap();
    assert_eq!(pipeline.plan().unwrap().ordinary[0].names(), vec!["p1", "p2"]);

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let request = counting_callback(fixture.request(), &calls, &seen);
    let result = pipeline.execute(request).await.unwrap();

    assert_result_succeeded(&result);
    assert_eq!(journal.max_concurrency(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_skips_unstarted_siblings() {
    let fixture = TestFixture::new();
    let a = mock(MockStep::new("a").with_delay(Duration::from_millis(20)));
    let b = mock(MockStep::stopping("b"));
    let c = mock(MockStep::new("c"));
    let d = mock(MockStep::new("d"));
    let f = mock(MockStep::new("f"));

    let pipeline = fixture
        .pipeline([
            declare(&a),
            declare(&b),
            declare(&c),
            declare(&d).after("a"),
            declare(&f).with_phase(StepPhase::Finalize),
        ])
        .unwrap();
    let result = pipeline.execute(fixture.request()).await.unwrap();

    assert_result_succeeded(&result);
    assert_step_status(&result, "b", StepStatus::Stopped);
    assert_step_status(&result, "c", StepStatus::Skipped);
    assert_step_status(&result, "a", StepStatus::Completed);
    assert_eq!(c.call_count(), 0);
    assert_eq!(a.call_count(), 1);
    assert_eq!(d.call_count(), 0);
    assert_step_absent(&result, "d");
    assert_eq!(f.call_count(), 1);

    let names: Vec<&str> = result.steps.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["b", "c", "a", "f"]);
    assert!(result.step("c").unwrap().message.as_deref().unwrap().contains("'b'"));
}

#[tokio::test]
async fn test_first_error_in_level_wins() {
    let fixture = TestFixture::new();
    let slow = mock(
        MockStep::failing("slow", "second").with_delay(Duration::from_millis(20)),
    );
    let fast = mock(MockStep::failing("fast", "first"));

    let pipeline = fixture.pipeline([declare(&slow), declare(&fast)]).unwrap();
    let result = pipeline.execute(fixture.request()).await.unwrap();

    assert_eq!(result.error.as_deref(), Some("first"));
    assert_step_status(&result, "slow", StepStatus::Failed);
    assert_step_status(&result, "fast", StepStatus::Failed);
}

#[tokio::test]
async fn test_stop_wins_over_later_error_in_level() {
    let fixture = TestFixture::new();
    let slow = mock(
        MockStep::failing("slow", "too late").with_delay(Duration::from_millis(20)),
    );
    let halt = mock(MockStep::stopping("halt"));
    let next = mock(MockStep::new("next"));

    let pipeline = fixture
        .pipeline([declare(&slow), declare(&halt), declare(&next).after("halt")])
        .unwrap();
    let result = pipeline.execute(fixture.request()).await.unwrap();

    assert_result_succeeded(&result);
    assert_eq!(result.error, None);
    assert_step_status(&result, "halt", StepStatus::Stopped);
    assert_step_status(&result, "slow", StepStatus::Failed);
    assert_eq!(next.call_count(), 0);
}

#[tokio::test]
async fn test_finalize_runs_once_on_every_path() {
    for (label, first) in [
        ("success", MockStep::new("first")),
        ("stop", MockStep::stopping("first")),
        ("error", MockStep::failing("first", "boom")),
    ] {
        let fixture = TestFixture::new();
        let first = mock(first);
        let settle = mock(MockStep::new("settle"));
        let pipeline = fixture
            .pipeline([
                declare(&first),
                declare(&settle).with_phase(StepPhase::Finalize),
            ])
            .unwrap();

        let result = pipeline.execute(fixture.request()).await.unwrap();
        assert_eq!(settle.call_count(), 1, "finalize count on {label} path");
        assert_eq!(result.steps.last().unwrap().name, "settle", "{label} path");
        assert_eq!(result.success, label != "error", "{label} path");
    }
}

#[tokio::test]
async fn test_finalize_failures_do_not_touch_result() {
    let fixture = TestFixture::new();
    let work = mock(MockStep::new("work").with_output(OutputAsset::image("https://cdn/a.png")));
    let broken = mock(MockStep::failing("broken", "ledger offline"));
    let panicky = mock(MockStep::panicking("panicky", "oops"));

    let pipeline = fixture
        .pipeline([
            declare(&work),
            declare(&broken).with_phase(StepPhase::Finalize),
            declare(&panicky).with_phase(StepPhase::Finalize),
        ])
        .unwrap();
    let result = pipeline.execute(fixture.request()).await.unwrap();

    assert_result_succeeded(&result);
    assert_eq!(result.output, vec![OutputAsset::image("https://cdn/a.png")]);
    assert_step_status(&result, "broken", StepStatus::Failed);
    assert_step_status(&result, "panicky", StepStatus::Failed);
}

#[tokio::test]
async fn test_finalize_steps_in_dependency_order() {
    let fixture = TestFixture::new();
    let journal = ExecutionJournal::new();
    let first = mock(MockStep::new("first").with_journal(journal.clone()));
    let second = mock(MockStep::new("second").with_journal(journal.clone()));

    let pipeline = fixture
        .pipeline([
            declare(&second).with_phase(StepPhase::Finalize).after("first"),
            declare(&first).with_phase(StepPhase::Finalize),
        ])
        .unwrap();
    pipeline.execute(fixture.request()).await.unwrap();

    assert_eq!(journal.started(), vec!["first", "second"]);
}

#[tokio::test]
async fn test_prepare_callback_receives_and_clears_before_hints() {
    let fixture = TestFixture::new();
    let charge = mock(
        MockStep::new("charge")
            .with_hint("charged 4 points", HintPosition::Before)
            .with_hint("done", HintPosition::After),
    );
    let generate = mock(MockStep::new("generate").with_hint("later", HintPosition::Before));
    let pipeline = fixture
        .pipeline([
            declare(&charge).with_phase(StepPhase::Prepare),
            declare(&generate).after("charge"),
        ])
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let request = counting_callback(fixture.request(), &calls, &seen);
    let result = pipeline.execute(request).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock(), vec!["charged 4 points".to_string()]);
    assert_eq!(result.before_hints(), ["later".to_string()]);
    assert_eq!(result.after_hints(), ["done".to_string()]);
}

#[tokio::test]
async fn test_prepare_callback_failure_keeps_hints() {
    let fixture = TestFixture::new();
    let charge = mock(MockStep::new("charge").with_hint("charged", HintPosition::Before));
    let pipeline = fixture
        .pipeline([declare(&charge).with_phase(StepPhase::Prepare)])
        .unwrap();

    let request = fixture
        .request()
        .on_prepare_complete(|_| async { Err(anyhow::anyhow!("socket closed")) });
    let result = pipeline.execute(request).await.unwrap();

    assert_result_succeeded(&result);
    assert_eq!(result.before_hints(), ["charged".to_string()]);
}

#[tokio::test]
async fn test_prepare_callback_fires_when_prepare_level_halts() {
    let fixture = TestFixture::new();
    let guard = mock(MockStep::failing("guard", "no credit"));
    let pipeline = fixture
        .pipeline([declare(&guard).with_phase(StepPhase::Prepare)])
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let request = counting_callback(fixture.request(), &calls, &seen);
    let result = pipeline.execute(request).await.unwrap();

    assert_result_failed_with(&result, "no credit");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_prepare_callback_fires_for_fully_disabled_prepare_level() {
    let fixture = TestFixture::new().with_step_toggle("charge", "charge", false);
    let charge = mock(MockStep::new("charge"));
    let next = mock(MockStep::new("next"));
    let pipeline = fixture
        .pipeline([
            declare(&charge).with_phase(StepPhase::Prepare),
            declare(&next).after("charge"),
        ])
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let request = counting_callback(fixture.request(), &calls, &seen);
    let result = pipeline.execute(request).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(charge.call_count(), 0);
    assert_eq!(next.call_count(), 1);
    assert_step_status(&result, "charge", StepStatus::Disabled);
}

#[tokio::test]
async fn test_prepare_callback_not_fired_without_prepare_steps() {
    let fixture = TestFixture::new();
    let work = mock(MockStep::new("work"));
    let pipeline = fixture.pipeline([declare(&work)]).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let request = counting_callback(fixture.request(), &calls, &seen);
    pipeline.execute(request).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_globally_disabled_step_and_unknown_channel_id() {
    let watermark = mock(MockStep::new("watermark"));
    let upload = mock(MockStep::new("upload"));
    let pipeline = PipelineBuilder::from_config(
        PipelineConfig::default().with_disabled_step("watermark"),
    )
    .steps([declare(&watermark), declare(&upload).after("watermark")])
    .unwrap()
    .build()
    .unwrap();

    let result = pipeline
        .execute(GenerationRequest::new(404_u64, "a cat"))
        .await
        .unwrap();

    assert_result_succeeded(&result);
    assert_eq!(watermark.call_count(), 0);
    assert_eq!(upload.call_count(), 1);
    assert_step_status(&result, "watermark", StepStatus::Disabled);
}

#[tokio::test]
async fn test_channel_toggle_reenables_globally_disabled_step() {
    let fixture = TestFixture::new().with_step_toggle("post", "watermark", true);
    let watermark = mock(MockStep::new("watermark"));
    let pipeline = fixture
        .builder()
        .with_gate(Arc::new(crate::pipeline::ChannelOverrideGate::with_disabled([
            "watermark",
        ])))
        .step(declare(&watermark))
        .unwrap()
        .build()
        .unwrap();

    pipeline.execute(fixture.request()).await.unwrap();
    assert_eq!(watermark.call_count(), 1);
}

#[tokio::test]
async fn test_unknown_channel_name_is_rejected() {
    let fixture = TestFixture::new();
    let work = mock(MockStep::new("work"));
    let settle = mock(MockStep::new("settle"));
    let pipeline = fixture
        .pipeline([
            declare(&work),
            declare(&settle).with_phase(StepPhase::Finalize),
        ])
        .unwrap();

    let result = pipeline
        .execute(GenerationRequest::new("missing", "a cat"))
        .await
        .unwrap();

    assert_eq!(result.error.as_deref(), Some("Channel 'missing' not found"));
    assert!(!result.success);
    assert!(result.steps.is_empty());
    assert_eq!(work.call_count(), 0);
    assert_eq!(settle.call_count(), 0);
}

#[tokio::test]
async fn test_disabled_channel_is_rejected() {
    let fixture = TestFixture::new();
    let work = mock(MockStep::new("work"));
    let settle = mock(MockStep::new("settle"));
    let channels = InMemoryChannelStore::new()
        .with_channel(fixture.channel().clone().with_enabled(false));
    let pipeline = fixture
        .builder()
        .with_channel_store(Arc::new(channels))
        .steps([
            declare(&work),
            declare(&settle).with_phase(StepPhase::Finalize),
        ])
        .unwrap()
        .build()
        .unwrap();

    let result = pipeline.execute(fixture.request()).await.unwrap();

    assert_eq!(
        result.error.as_deref(),
        Some("Channel 'test-channel' is disabled")
    );
    assert!(!result.success);
    assert!(result.steps.is_empty());
    assert_eq!(work.call_count(), 0);
    assert_eq!(settle.call_count(), 0);
}

#[tokio::test]
async fn test_channel_by_name_sees_merged_config() {
    let fixture = TestFixture::new()
        .with_global_config("style", "strength", json!(1))
        .with_global_config("style", "preset", json!("anime"))
        .with_channel_override("style", "strength", json!(5));

    let styler = StepDefinition::new(
        "styler",
        Arc::new(AsyncFnStep::new(|ctx: StepContext| async move {
            let config = ctx.config().await.unwrap_or_default();
            ctx.record_diagnostic(serde_json::Value::Object(config));
            StepSignal::proceed()
        })),
    )
    .with_config_group("style");
    let pipeline = fixture.pipeline([styler]).unwrap();

    let result = pipeline
        .execute(GenerationRequest::new(TEST_CHANNEL_NAME, "a cat"))
        .await
        .unwrap();

    assert_result_succeeded(&result);
    assert_eq!(
        result.diagnostics.get("styler"),
        Some(&json!({"strength": 5, "preset": "anime"}))
    );
}

#[tokio::test]
async fn test_panicking_step_becomes_error() {
    let fixture = TestFixture::new();
    let bad = mock(MockStep::panicking("bad", "kaboom"));
    let after = mock(MockStep::new("after"));
    let pipeline = fixture
        .pipeline([declare(&bad), declare(&after).after("bad")])
        .unwrap();

    let result = pipeline.execute(fixture.request()).await.unwrap();

    assert_result_failed_with(&result, "step 'bad' panicked: kaboom");
    assert_eq!(after.call_count(), 0);
}

#[tokio::test]
async fn test_uncaught_panic_resumes_after_finalize() {
    let fixture = TestFixture::new();
    let bad = mock(MockStep::panicking("bad", "kaboom"));
    let after = mock(MockStep::new("after"));
    let settle = mock(MockStep::new("settle"));
    let pipeline = fixture
        .builder()
        .with_catch_panics(false)
        .steps([
            declare(&bad),
            declare(&after).after("bad"),
            declare(&settle).with_phase(StepPhase::Finalize),
        ])
        .unwrap()
        .build()
        .unwrap();

    let outcome = AssertUnwindSafe(pipeline.execute(fixture.request()))
        .catch_unwind()
        .await;

    let payload = outcome.err().expect("panic should propagate");
    assert_eq!(payload.downcast_ref::<String>().map(String::as_str), Some("kaboom"));
    assert_eq!(after.call_count(), 0);
    assert_eq!(settle.call_count(), 1);
}

#[tokio::test]
async fn test_prompt_and_output_flow_between_levels() {
    let fixture = TestFixture::new();
    let translate = mock(MockStep::new("translate").with_prompt_suffix(", highly detailed"));
    let generate = StepDefinition::new(
        "generate",
        Arc::new(AsyncFnStep::new(|ctx: StepContext| async move {
            ctx.push_output(OutputAsset::text(ctx.prompt()));
            StepSignal::proceed()
        })),
    )
    .after("translate");
    let pipeline = fixture.pipeline([declare(&translate), generate]).unwrap();

    let result = pipeline.execute(fixture.request()).await.unwrap();

    assert_eq!(result.output, vec![OutputAsset::text("a cat, highly detailed")]);
}

#[tokio::test]
async fn test_stopped_run_keeps_partial_output() {
    let fixture = TestFixture::new();
    let cached = mock(
        MockStep::stopping("cache")
            .with_output(OutputAsset::image("https://cdn/cached.png"))
            .with_diagnostic(json!({"hit": true})),
    );
    let generate = mock(MockStep::new("generate"));
    let pipeline = fixture
        .pipeline([declare(&cached), declare(&generate).after("cache")])
        .unwrap();

    let result = pipeline.execute(fixture.request()).await.unwrap();

    assert_result_succeeded(&result);
    assert_eq!(result.output.len(), 1);
    assert_eq!(result.diagnostics.get("cache"), Some(&json!({"hit": true})));
    assert_eq!(generate.call_count(), 0);
}

#[tokio::test]
async fn test_store_conflict_fails_the_step() {
    let fixture = TestFixture::new();
    let first = mock(MockStep::new("first").with_store_write("seed", json!(1)));
    let second = mock(MockStep::new("second").with_store_write("seed", json!(2)));
    let pipeline = fixture
        .pipeline([declare(&first), declare(&second).after("first")])
        .unwrap();

    let result = pipeline.execute(fixture.request()).await.unwrap();

    assert!(!result.success);
    assert_step_status(&result, "second", StepStatus::Failed);
    assert!(result.error.as_deref().unwrap().contains("seed"));
}

#[tokio::test]
async fn test_cycle_reported_before_any_step_runs() {
    let fixture = TestFixture::new();
    let bystander = mock(MockStep::new("bystander"));
    let pipeline = fixture.pipeline([declare(&bystander)]).unwrap();

    let a = mock(MockStep::new("a"));
    let b = mock(MockStep::new("b"));
    pipeline.register(declare(&a).after("b")).unwrap();
    pipeline.register(declare(&b).after("a")).unwrap();

    let cycle = match pipeline.execute(fixture.request()).await {
        Err(PipelineError::CycleDetected(cycle)) => cycle,
        other => panic!("expected a cycle error, got {other:?}"),
    };
    let mut steps = cycle.steps();
    steps.sort();
    assert_eq!(steps, vec!["a", "b"]);
    assert_eq!(bystander.call_count(), 0);

    pipeline.unregister("b");
    let result = pipeline.execute(fixture.request()).await.unwrap();
    assert_result_succeeded(&result);
    assert_eq!(bystander.call_count(), 1);
    assert_eq!(a.call_count(), 1);
}

#[tokio::test]
async fn test_plan_cache_follows_registry() {
    let fixture = TestFixture::new();
    let old = mock(MockStep::new("work"));
    let pipeline = fixture.pipeline([declare(&old)]).unwrap();

    let first = pipeline.plan().unwrap();
    assert!(Arc::ptr_eq(&first, &pipeline.plan().unwrap()));

    let new = mock(MockStep::new("work"));
    pipeline.registry().replace(declare(&new)).unwrap();
    let rebound = pipeline.plan().unwrap();
    assert!(!Arc::ptr_eq(&first, &rebound));
    assert_eq!(first.fingerprint, rebound.fingerprint);

    pipeline.execute(fixture.request()).await.unwrap();
    assert_eq!(old.call_count(), 0);
    assert_eq!(new.call_count(), 1);

    let extra = mock(MockStep::new("extra"));
    pipeline.register(declare(&extra).after("work")).unwrap();
    let rebuilt = pipeline.plan().unwrap();
    assert_ne!(rebuilt.fingerprint, first.fingerprint);
    assert_eq!(rebuilt.ordinary.len(), 2);
}

#[tokio::test]
async fn test_concurrent_requests_have_isolated_contexts() {
    let fixture = TestFixture::new();
    let echo = StepDefinition::new(
        "echo",
        Arc::new(AsyncFnStep::new(|ctx: StepContext| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            ctx.push_output(OutputAsset::text(ctx.prompt()));
            StepSignal::from(ctx.store_set("prompt", json!(ctx.prompt())))
        })),
    );
    let pipeline = Arc::new(fixture.pipeline([echo]).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .execute(GenerationRequest::new(1_u64, format!("prompt {i}")))
                    .await
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap().unwrap();
        assert_result_succeeded(&result);
        assert_eq!(result.output, vec![OutputAsset::text(format!("prompt {i}"))]);
    }
}

#[tokio::test]
async fn test_events_follow_the_run() {
    let fixture = TestFixture::new();
    let sink = Arc::new(CollectingEventSink::new());
    let charge = mock(MockStep::new("charge"));
    let skipped = mock(MockStep::new("skipped"));
    let fail = mock(MockStep::failing("fail", "backend down"));
    let settle = mock(MockStep::failing("settle", "ledger offline"));

    let pipeline = fixture
        .builder()
        .with_event_sink(sink.clone())
        .steps([
            declare(&charge).with_phase(StepPhase::Prepare),
            declare(&fail).after("charge"),
            declare(&skipped).after("charge"),
            declare(&settle).with_phase(StepPhase::Finalize),
        ])
        .unwrap()
        .build()
        .unwrap();
    pipeline.execute(fixture.request()).await.unwrap();

    let types = sink.event_types();
    assert_eq!(types.first().map(String::as_str), Some(names::PIPELINE_STARTED));
    assert_eq!(types.last().map(String::as_str), Some(names::PIPELINE_FAILED));
    assert!(types.iter().any(|t| t == names::PIPELINE_PREPARED));

    assert_eq!(
        sink.step_event_types("charge"),
        vec![names::STEP_STARTED, names::STEP_COMPLETED]
    );
    assert_eq!(
        sink.step_event_types("fail"),
        vec![names::STEP_STARTED, names::STEP_FAILED]
    );
    assert_eq!(sink.step_event_types("skipped"), vec![names::STEP_SKIPPED]);
    assert_eq!(
        sink.step_event_types("settle"),
        vec![names::STEP_STARTED, names::STEP_FAILED, names::FINALIZE_FAILED]
    );

    let (_, data) = &sink.events()[0];
    let data = data.as_ref().unwrap();
    assert_eq!(data["channel_id"], json!(1));
    assert!(data["run_id"].is_string());
}

fn billing_fixture(balance: i64, cost: i64) -> (TestFixture, Arc<InMemoryLedger>) {
    let ledger = Arc::new(InMemoryLedger::new().with_balance(7, "default", balance));
    let service: Arc<dyn BalanceLedger> = ledger.clone();
    let fixture = TestFixture::new()
        .with_uid(7)
        .with_global_config(BILLING_GROUP, "cost", json!(cost))
        .with_service(BILLING_SERVICE, service);
    (fixture, ledger)
}

#[tokio::test]
async fn test_billing_charge_and_confirm() {
    let (fixture, ledger) = billing_fixture(10, 4);
    let generate = mock(MockStep::new("generate").with_output(OutputAsset::image("https://cdn/out.png")));
    let mut steps = billing_steps();
    steps.push(declare(&generate).after(BillingPrepareStep::NAME));
    let pipeline = fixture.pipeline(steps).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let request = counting_callback(fixture.request(), &calls, &seen);
    let result = pipeline.execute(request).await.unwrap();

    assert_result_succeeded(&result);
    assert_eq!(ledger.get(7, "default"), 6);
    assert_eq!(*seen.lock(), vec!["Charged 4 points, balance 6 points".to_string()]);
    assert!(result.before_hints().is_empty());
    assert_eq!(
        result.after_hints(),
        ["Generation succeeded, spent 4 points, balance 6 points".to_string()]
    );
    assert_settled_before(&result, "generate", "billing-finalize");
}

#[tokio::test]
async fn test_billing_refunds_failed_generation() {
    let (fixture, ledger) = billing_fixture(10, 4);
    let generate = mock(MockStep::failing("generate", "backend down"));
    let mut steps = billing_steps();
    steps.push(declare(&generate).after(BillingPrepareStep::NAME));
    let pipeline = fixture.pipeline(steps).unwrap();

    let result = pipeline.execute(fixture.request()).await.unwrap();

    assert_result_failed_with(&result, "backend down");
    assert_eq!(ledger.get(7, "default"), 10);
    assert_eq!(
        result.after_hints(),
        ["Generation failed, refunded 4 points, balance 10 points".to_string()]
    );
}

#[tokio::test]
async fn test_billing_insufficient_balance_blocks_generation() {
    let (fixture, ledger) = billing_fixture(2, 5);
    let generate = mock(MockStep::new("generate"));
    let mut steps = billing_steps();
    steps.push(declare(&generate).after(BillingPrepareStep::NAME));
    let pipeline = fixture.pipeline(steps).unwrap();

    let result = pipeline.execute(fixture.request()).await.unwrap();

    assert_eq!(
        result.error.as_deref(),
        Some("Insufficient balance: 5 points required, balance 2 points")
    );
    assert_eq!(generate.call_count(), 0);
    assert_eq!(ledger.get(7, "default"), 2);
    assert_step_status(&result, "billing-finalize", StepStatus::Completed);
    assert!(result.hints.is_none());
}
