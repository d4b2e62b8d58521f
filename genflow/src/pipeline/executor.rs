//! Level-by-level pipeline execution.
//!
//! A run walks the ordinary levels in order, driving each level's enabled
//! steps concurrently on the request's task. The first stop or error in a
//! level raises a level-scoped [`CancellationToken`]: siblings that have not
//! started yet are recorded as skipped, siblings already running finish and
//! their outcome is superseded. Finalize steps run in a second walk that
//! always happens, whatever the main walk did. With panic capture turned
//! off, a step panic still lets the finalize walk run and is re-raised
//! afterwards.

use super::{ChannelStore, ExecutionPlan, Level, StepDefinition, StepGate, StepRegistry};
use crate::cancellation::CancellationToken;
use crate::context::{
    ChannelConfig, ChannelRef, ContextFactory, GenerationRequest, GenerationResult,
    PipelineContext, PrepareCallback,
};
use crate::core::{StepPhase, StepRecord, StepSignal, StepStatus};
use crate::errors::PipelineError;
use crate::events::names;
use crate::services::ServiceRegistry;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// A plan together with the registry revision it was built for.
#[derive(Debug)]
struct CachedPlan {
    revision: u64,
    plan: Arc<ExecutionPlan>,
}

/// How a step settled within its level.
struct Settled {
    record: StepRecord,
    signal: Option<StepSignal>,
    /// True if this step's stop or error raised the level token.
    decisive: bool,
    /// Payload of an uncaptured panic, re-raised once finalize has run.
    panic: Option<Box<dyn Any + Send>>,
}

/// Why the main walk ended early.
enum Halt {
    Stopped(String),
    Failed,
}

/// Runs generation requests through the registered steps.
///
/// Cheap to share behind an `Arc`; concurrent requests get independent
/// contexts and only share the cached plan.
pub struct GenerationPipeline {
    name: String,
    registry: Arc<StepRegistry>,
    factory: ContextFactory,
    channel_store: Arc<dyn ChannelStore>,
    gate: Arc<dyn StepGate>,
    catch_panics: bool,
    plan_cache: Mutex<Option<CachedPlan>>,
}

impl GenerationPipeline {
    pub(crate) fn new(
        name: String,
        registry: Arc<StepRegistry>,
        factory: ContextFactory,
        channel_store: Arc<dyn ChannelStore>,
        gate: Arc<dyn StepGate>,
        catch_panics: bool,
    ) -> Self {
        Self {
            name,
            registry,
            factory,
            channel_store,
            gate,
            catch_panics,
            plan_cache: Mutex::new(None),
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the step registry. Changes apply from the next request.
    #[must_use]
    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.registry
    }

    /// Returns the service registry handed to steps.
    #[must_use]
    pub fn services(&self) -> &Arc<ServiceRegistry> {
        self.factory.services()
    }

    /// Registers a step at runtime.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid or duplicate step.
    pub fn register(&self, step: StepDefinition) -> Result<(), PipelineError> {
        self.registry.register(step)
    }

    /// Removes a step at runtime.
    pub fn unregister(&self, name: &str) -> Option<Arc<StepDefinition>> {
        self.registry.unregister(name)
    }

    /// Returns the execution plan for the current step set.
    ///
    /// The last plan is cached. A registry change with the same structure
    /// only swaps the definitions in; a structural change rebuilds the
    /// graph.
    ///
    /// # Errors
    ///
    /// Returns the graph builder's error if the step set is cyclic.
    pub fn plan(&self) -> Result<Arc<ExecutionPlan>, PipelineError> {
        let (steps, revision) = self.registry.snapshot_with_revision();
        let mut cache = self.plan_cache.lock();

        if let Some(cached) = cache.as_ref() {
            if cached.revision == revision {
                return Ok(cached.plan.clone());
            }
            if let Some(plan) = cached.plan.rebind(&steps) {
                debug!(pipeline = %self.name, revision, "Rebound execution plan");
                let plan = Arc::new(plan);
                *cache = Some(CachedPlan {
                    revision,
                    plan: plan.clone(),
                });
                return Ok(plan);
            }
        }

        let plan = Arc::new(ExecutionPlan::build(&steps)?);
        debug!(
            pipeline = %self.name,
            revision,
            steps = plan.step_count(),
            levels = plan.levels.len(),
            fingerprint = %plan.fingerprint,
            "Built execution plan"
        );
        *cache = Some(CachedPlan {
            revision,
            plan: plan.clone(),
        });
        Ok(plan)
    }

    /// Executes one request.
    ///
    /// Step failures never surface as `Err`: they produce a result with
    /// `success == false`. A channel named in the request that does not
    /// exist, or a disabled channel, yields a failed result without running
    /// any step.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::CycleDetected` if the registered steps form
    /// a cycle. No step runs in that case.
    pub async fn execute(
        &self,
        mut request: GenerationRequest,
    ) -> Result<GenerationResult, PipelineError> {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let plan = self.plan()?;

        let span = info_span!("pipeline", pipeline = %self.name, run_id = %run_id);
        async move {
            let Some((channel_id, channel)) = self.resolve_channel(&request.channel).await else {
                warn!(channel = %request.channel, "Channel not found");
                return Ok(GenerationResult::rejected(
                    run_id,
                    format!("Channel {} not found", request.channel),
                    elapsed_ms(started),
                ));
            };
            if let Some(config) = channel.as_ref().filter(|c| !c.enabled) {
                warn!(channel = %config.name, "Channel disabled");
                return Ok(GenerationResult::rejected(
                    run_id,
                    format!("Channel '{}' is disabled", config.name),
                    elapsed_ms(started),
                ));
            }

            let callback = request.take_prepare_callback();
            let ctx = self.factory.create(run_id, request, channel_id, channel);
            Ok(self.run(&plan, &ctx, callback, started).await)
        }
        .instrument(span)
        .await
    }

    /// Looks up the request's channel. `None` only for an unknown name; an
    /// unknown id runs without channel configuration.
    async fn resolve_channel(
        &self,
        channel: &ChannelRef,
    ) -> Option<(Option<u64>, Option<ChannelConfig>)> {
        match channel {
            ChannelRef::Id(id) => {
                let config = self.channel_store.get_channel(*id).await;
                if config.is_none() {
                    debug!(channel_id = id, "Unknown channel id, using global config only");
                }
                Some((Some(*id), config))
            }
            ChannelRef::Name(name) => self
                .channel_store
                .find_channel_by_name(name)
                .await
                .map(|config| (Some(config.id), Some(config))),
        }
    }

    async fn run(
        &self,
        plan: &ExecutionPlan,
        ctx: &Arc<PipelineContext>,
        mut callback: Option<PrepareCallback>,
        started: Instant,
    ) -> GenerationResult {
        info!(
            steps = plan.step_count(),
            levels = plan.ordinary.len(),
            channel_id = ?ctx.channel_id(),
            "Pipeline started"
        );
        ctx.emit_event(
            names::PIPELINE_STARTED,
            Some(json!({
                "pipeline": &self.name,
                "steps": plan.step_count(),
                "levels": plan.levels.len(),
            })),
        )
        .await;

        let mut records = Vec::with_capacity(plan.step_count());
        let mut prepared = false;
        let mut halt = None;
        let mut panic = None;

        for level in &plan.ordinary {
            let is_prepare = !prepared && level.contains_phase(StepPhase::Prepare);
            let enabled = self.enabled_steps(level, ctx, &mut records).await;

            if !enabled.is_empty() {
                let token = CancellationToken::new();
                for mut settled in self.run_level(&enabled, ctx, Some(&token)).await {
                    if panic.is_none() {
                        panic = settled.panic.take();
                    }
                    if halt.is_none() && settled.decisive {
                        halt = halt_reason(&settled, ctx);
                    } else if let Some(signal) = settled.signal.as_ref().filter(|s| !s.is_continue()) {
                        debug!(
                            step = %settled.record.name,
                            status = %signal.status(),
                            "Outcome superseded by an earlier stop or error"
                        );
                    }
                    records.push(settled.record);
                }
            }

            if is_prepare {
                prepared = true;
                prepare_complete(ctx, callback.take()).await;
            }

            if halt.is_some() {
                break;
            }
        }

        let finalize_panic = self.finalize(plan, ctx, &mut records).await;
        if let Some(payload) = panic.or(finalize_panic) {
            error!("Re-raising step panic after finalize");
            std::panic::resume_unwind(payload);
        }

        let duration_ms = elapsed_ms(started);
        let error = ctx.error();
        let hints = ctx.hints();
        let result = GenerationResult {
            run_id: ctx.run_id(),
            success: error.is_none(),
            output: ctx.output().unwrap_or_default(),
            error,
            duration_ms,
            hints: (!hints.is_empty()).then_some(hints),
            diagnostics: ctx.diagnostics(),
            steps: records,
        };

        if let Some(message) = &result.error {
            info!(duration_ms, error = %message, "Pipeline failed");
            ctx.emit_event(
                names::PIPELINE_FAILED,
                Some(json!({ "error": message, "duration_ms": duration_ms })),
            )
            .await;
        } else {
            let stopped_by = match &halt {
                Some(Halt::Stopped(step)) => Some(step.as_str()),
                _ => None,
            };
            info!(duration_ms, outputs = result.output.len(), ?stopped_by, "Pipeline completed");
            ctx.emit_event(
                names::PIPELINE_COMPLETED,
                Some(json!({
                    "duration_ms": duration_ms,
                    "outputs": result.output.len(),
                    "stopped_by": stopped_by,
                })),
            )
            .await;
        }
        result
    }

    /// Runs every finalize level. Failures are logged and never reach the
    /// result. Returns the first uncaptured panic, after every level ran.
    async fn finalize(
        &self,
        plan: &ExecutionPlan,
        ctx: &Arc<PipelineContext>,
        records: &mut Vec<StepRecord>,
    ) -> Option<Box<dyn Any + Send>> {
        let mut panic = None;
        for level in &plan.finalize {
            let enabled = self.enabled_steps(level, ctx, records).await;
            if enabled.is_empty() {
                continue;
            }
            for mut settled in self.run_level(&enabled, ctx, None).await {
                if panic.is_none() {
                    panic = settled.panic.take();
                }
                if let Some(StepSignal::Error(err)) = &settled.signal {
                    error!(step = %settled.record.name, error = ?err, "Finalize step failed");
                    ctx.try_emit_event(
                        names::FINALIZE_FAILED,
                        Some(json!({ "step": &settled.record.name, "error": err.to_string() })),
                    );
                }
                records.push(settled.record);
            }
        }
        panic
    }

    /// Drops the steps the gate turns off for this channel and records them.
    async fn enabled_steps(
        &self,
        level: &Level,
        ctx: &PipelineContext,
        records: &mut Vec<StepRecord>,
    ) -> Vec<Arc<StepDefinition>> {
        let mut enabled = Vec::with_capacity(level.len());
        for step in &level.steps {
            if self.gate.is_step_enabled(&step.name, ctx.channel()).await {
                enabled.push(step.clone());
            } else {
                debug!(step = %step.name, "Skipping disabled step");
                ctx.try_emit_event(
                    names::STEP_DISABLED,
                    Some(json!({ "step": &step.name, "phase": step.phase })),
                );
                records.push(StepRecord::disabled(&step.name, step.phase));
            }
        }
        enabled
    }

    /// Drives the steps of one level to completion, in settlement order.
    ///
    /// Nothing is spawned: the futures are polled on the caller's task,
    /// so a step only starts once it is first polled.
    async fn run_level(
        &self,
        steps: &[Arc<StepDefinition>],
        ctx: &Arc<PipelineContext>,
        token: Option<&CancellationToken>,
    ) -> Vec<Settled> {
        let mut running: FuturesUnordered<_> = steps
            .iter()
            .map(|step| self.run_step(step, ctx, token))
            .collect();

        let mut settled = Vec::with_capacity(steps.len());
        while let Some(outcome) = running.next().await {
            settled.push(outcome);
        }
        settled
    }

    async fn run_step(
        &self,
        step: &Arc<StepDefinition>,
        ctx: &Arc<PipelineContext>,
        token: Option<&CancellationToken>,
    ) -> Settled {
        if let Some(reason) = token.and_then(CancellationToken::reason) {
            debug!(step = %step.name, reason = %reason, "Skipping step");
            ctx.try_emit_event(
                names::STEP_SKIPPED,
                Some(json!({ "step": &step.name, "phase": step.phase, "reason": &reason })),
            );
            return Settled {
                record: StepRecord::skipped(&step.name, step.phase, Some(reason)),
                signal: None,
                decisive: false,
                panic: None,
            };
        }

        let step_ctx = self.factory.step_context(ctx, step);
        ctx.try_emit_event(
            names::STEP_STARTED,
            Some(json!({ "step": &step.name, "phase": step.phase })),
        );

        let started_at = Utc::now();
        let clock = Instant::now();
        let (signal, panic) = match AssertUnwindSafe(step.runner.execute(&step_ctx))
            .catch_unwind()
            .await
        {
            Ok(signal) => (signal, None),
            Err(payload) => {
                let signal = StepSignal::error(format!(
                    "step '{}' panicked: {}",
                    step.name,
                    panic_message(payload.as_ref())
                ));
                (signal, (!self.catch_panics).then_some(payload))
            }
        };
        let duration_ms = elapsed_ms(clock);

        let decisive = match &signal {
            StepSignal::Continue => false,
            StepSignal::Stop => token
                .is_some_and(|t| t.cancel(format!("step '{}' stopped the pipeline", step.name))),
            StepSignal::Error(_) => {
                token.is_some_and(|t| t.cancel(format!("step '{}' failed", step.name)))
            }
        };

        let message = signal.error_message();
        let (event, data) = match signal.status() {
            StepStatus::Stopped => (
                names::STEP_STOPPED,
                json!({ "step": &step.name, "phase": step.phase, "duration_ms": duration_ms }),
            ),
            StepStatus::Failed => (
                names::STEP_FAILED,
                json!({
                    "step": &step.name,
                    "phase": step.phase,
                    "error": &message,
                    "duration_ms": duration_ms,
                }),
            ),
            _ => (
                names::STEP_COMPLETED,
                json!({ "step": &step.name, "phase": step.phase, "duration_ms": duration_ms }),
            ),
        };
        ctx.try_emit_event(event, Some(data));

        Settled {
            record: StepRecord::invoked(
                &step.name,
                step.phase,
                signal.status(),
                message,
                started_at,
                duration_ms,
            ),
            signal: Some(signal),
            decisive,
            panic,
        }
    }
}

impl fmt::Debug for GenerationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationPipeline")
            .field("name", &self.name)
            .field("steps", &self.registry.names())
            .field("catch_panics", &self.catch_panics)
            .finish_non_exhaustive()
    }
}

/// Records the stop or error that ended the main walk.
fn halt_reason(settled: &Settled, ctx: &PipelineContext) -> Option<Halt> {
    let step = settled.record.name.clone();
    match settled.signal.as_ref()? {
        StepSignal::Continue => None,
        StepSignal::Stop => {
            info!(step = %step, "Pipeline stopped by step");
            Some(Halt::Stopped(step))
        }
        StepSignal::Error(err) => {
            error!(step = %step, error = ?err, "Step failed");
            ctx.set_error(err.to_string());
            Some(Halt::Failed)
        }
    }
}

/// Hands the before-hints to the caller once the prepare level settled.
async fn prepare_complete(ctx: &PipelineContext, callback: Option<PrepareCallback>) {
    if let Some(callback) = callback {
        match callback(ctx.before_hints()).await {
            Ok(()) => {
                ctx.clear_before_hints();
                debug!("Prepare callback completed");
            }
            Err(err) => warn!(error = ?err, "Prepare callback failed"),
        }
    }
    ctx.emit_event(
        names::PIPELINE_PREPARED,
        Some(json!({ "before_hints": ctx.before_hints() })),
    )
    .await;
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
