//! Mock steps for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::context::{HintPosition, StepContext};
use crate::core::{OutputAsset, StepSignal};
use crate::steps::Step;

/// How a [`MockStep`] finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Return `Continue`.
    Proceed,
    /// Return `Stop`.
    Stop,
    /// Return `Error` with this message.
    Fail(String),
    /// Panic with this message.
    Panic(String),
}

/// Records when steps start and end, across a whole run.
#[derive(Debug, Default)]
pub struct ExecutionJournal {
    entries: Mutex<Vec<String>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ExecutionJournal {
    /// Creates a shared journal.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn start(&self, step: &str) {
        self.entries.lock().push(format!("start:{step}"));
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
    }

    fn end(&self, step: &str) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.entries.lock().push(format!("end:{step}"));
    }

    /// Returns all entries, e.g. `["start:a", "end:a"]`.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Returns step names in start order.
    #[must_use]
    pub fn started(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter_map(|e| e.strip_prefix("start:").map(str::to_string))
            .collect()
    }

    /// Returns the position of an entry, if recorded.
    #[must_use]
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }

    /// Returns the largest number of steps that ran at the same time.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

/// A scriptable step that records its calls.
#[derive(Debug)]
pub struct MockStep {
    name: String,
    behavior: MockBehavior,
    delay: Option<Duration>,
    outputs: Vec<OutputAsset>,
    hints: Vec<(String, HintPosition)>,
    store_writes: Vec<(String, serde_json::Value)>,
    prompt_suffix: Option<String>,
    diagnostic: Option<serde_json::Value>,
    journal: Option<Arc<ExecutionJournal>>,
    calls: AtomicUsize,
    seen_errors: Mutex<Vec<Option<String>>>,
}

impl MockStep {
    /// Creates a step that proceeds.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behavior: MockBehavior::Proceed,
            delay: None,
            outputs: Vec::new(),
            hints: Vec::new(),
            store_writes: Vec::new(),
            prompt_suffix: None,
            diagnostic: None,
            journal: None,
            calls: AtomicUsize::new(0),
            seen_errors: Mutex::new(Vec::new()),
        }
    }

    /// Creates a step that stops the pipeline.
    #[must_use]
    pub fn stopping(name: impl Into<String>) -> Self {
        Self::new(name).with_behavior(MockBehavior::Stop)
    }

    /// Creates a step that fails with a message.
    #[must_use]
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name).with_behavior(MockBehavior::Fail(message.into()))
    }

    /// Creates a step that panics.
    #[must_use]
    pub fn panicking(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name).with_behavior(MockBehavior::Panic(message.into()))
    }

    /// Sets the behavior.
    #[must_use]
    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Sleeps before finishing.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Appends an asset to the output.
    #[must_use]
    pub fn with_output(mut self, asset: OutputAsset) -> Self {
        self.outputs.push(asset);
        self
    }

    /// Adds a hint.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>, position: HintPosition) -> Self {
        self.hints.push((hint.into(), position));
        self
    }

    /// Writes a store key.
    #[must_use]
    pub fn with_store_write(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.store_writes.push((key.into(), value));
        self
    }

    /// Appends text to the prompt.
    #[must_use]
    pub fn with_prompt_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.prompt_suffix = Some(suffix.into());
        self
    }

    /// Records a diagnostic.
    #[must_use]
    pub fn with_diagnostic(mut self, value: serde_json::Value) -> Self {
        self.diagnostic = Some(value);
        self
    }

    /// Reports start/end to a journal.
    #[must_use]
    pub fn with_journal(mut self, journal: Arc<ExecutionJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Returns the step name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns how many times the step ran.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the pipeline error the step saw on each call.
    #[must_use]
    pub fn seen_errors(&self) -> Vec<Option<String>> {
        self.seen_errors.lock().clone()
    }
}

#[async_trait]
impl Step for MockStep {
    async fn execute(&self, ctx: &StepContext) -> StepSignal {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_errors.lock().push(ctx.error());
        if let Some(journal) = &self.journal {
            journal.start(&self.name);
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(suffix) = &self.prompt_suffix {
            ctx.set_prompt(format!("{}{suffix}", ctx.prompt()));
        }
        for asset in &self.outputs {
            ctx.push_output(asset.clone());
        }
        for (hint, position) in &self.hints {
            ctx.add_hint(hint.clone(), *position);
        }
        if let Some(value) = &self.diagnostic {
            ctx.record_diagnostic(value.clone());
        }
        let mut signal = StepSignal::proceed();
        for (key, value) in &self.store_writes {
            if let Err(e) = ctx.store_set(key.clone(), value.clone()) {
                signal = StepSignal::fail(e);
            }
        }

        if let Some(journal) = &self.journal {
            journal.end(&self.name);
        }

        if !signal.is_continue() {
            return signal;
        }
        match &self.behavior {
            MockBehavior::Proceed => StepSignal::proceed(),
            MockBehavior::Stop => StepSignal::Stop,
            MockBehavior::Fail(message) => StepSignal::error(message.clone()),
            MockBehavior::Panic(message) => panic!("{message}"),
        }
    }
}
