//! Step trait and implementations.
//!
//! Steps are the units of work a pipeline schedules. A step reads and
//! writes the shared context through its [`StepContext`] and answers with
//! a [`StepSignal`]; ordering is declared on the
//! [`StepDefinition`](crate::pipeline::StepDefinition), never decided by the
//! step.

pub mod billing;

use crate::context::StepContext;
use crate::core::StepSignal;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;

pub use billing::{
    billing_steps, render_template, BalanceLedger, BillingConfig, BillingFinalizeStep,
    BillingMessage, BillingPrepareStep, InMemoryLedger, TemplateVars, BILLING_GROUP,
    BILLING_SERVICE,
};

/// Trait for pipeline steps.
///
/// A step must not assume the order in which its siblings in the same
/// level run.
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Executes the step.
    ///
    /// Return [`StepSignal::proceed()`] to let the pipeline go on,
    /// [`StepSignal::Stop`] to halt it without failing, or
    /// [`StepSignal::Error`] to fail it.
    async fn execute(&self, ctx: &StepContext) -> StepSignal;
}

/// A synchronous function-based step.
pub struct FnStep<F>
where
    F: Fn(&StepContext) -> StepSignal + Send + Sync,
{
    func: F,
}

impl<F> FnStep<F>
where
    F: Fn(&StepContext) -> StepSignal + Send + Sync,
{
    /// Creates a new function-based step.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnStep<F>
where
    F: Fn(&StepContext) -> StepSignal + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: Fn(&StepContext) -> StepSignal + Send + Sync,
{
    async fn execute(&self, ctx: &StepContext) -> StepSignal {
        (self.func)(ctx)
    }
}

/// An async function-based step.
///
/// The closure receives an owned (cheaply cloned) [`StepContext`] so the
/// returned future does not borrow from the caller.
pub struct AsyncFnStep<F, Fut>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = StepSignal> + Send,
{
    func: F,
    _phantom: std::marker::PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnStep<F, Fut>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = StepSignal> + Send,
{
    /// Creates a new async function-based step.
    pub fn new(func: F) -> Self {
        Self {
            func,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncFnStep<F, Fut>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = StepSignal> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnStep").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Step for AsyncFnStep<F, Fut>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = StepSignal> + Send,
{
    async fn execute(&self, ctx: &StepContext) -> StepSignal {
        (self.func)(ctx.clone()).await
    }
}

/// A step that always proceeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpStep;

#[async_trait]
impl Step for NoOpStep {
    async fn execute(&self, _ctx: &StepContext) -> StepSignal {
        StepSignal::proceed()
    }
}
