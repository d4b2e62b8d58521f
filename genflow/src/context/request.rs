//! Caller-facing request and result types.

use super::{ChannelRef, ConfigMap, UserHints};
use crate::core::{OutputAsset, StepRecord, StepStatus};
use crate::errors::PipelineError;
use base64::Engine as _;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// One-shot callback fired after the prepare level settles.
///
/// Receives the accumulated "before" hints. On `Ok` the hints are cleared
/// from the context so they do not show up again in the final result.
pub type PrepareCallback =
    Box<dyn FnOnce(Vec<String>) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// An opaque transport/session handle passed through to steps.
pub type SessionHandle = Arc<dyn Any + Send + Sync>;

/// An input file attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// Raw bytes.
    pub data: Vec<u8>,
    /// MIME type.
    pub mime: String,
    /// Original file name, if known.
    pub filename: Option<String>,
}

impl InputFile {
    /// Creates a file from raw bytes.
    #[must_use]
    pub fn new(data: impl Into<Vec<u8>>, mime: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime: mime.into(),
            filename: None,
        }
    }

    /// Sets the file name.
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Parses a `data:<mime>;base64,<payload>` URL.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidInput` if the URL is not a base64 data
    /// URL or the payload does not decode.
    pub fn from_data_url(url: &str) -> Result<Self, PipelineError> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| PipelineError::InvalidInput("not a data URL".to_string()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| PipelineError::InvalidInput("data URL has no payload".to_string()))?;
        let mime = header.strip_suffix(";base64").ok_or_else(|| {
            PipelineError::InvalidInput("only base64 data URLs are supported".to_string())
        })?;

        let data = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| PipelineError::InvalidInput(format!("invalid base64 payload: {e}")))?;

        let mime = if mime.is_empty() {
            "application/octet-stream"
        } else {
            mime
        };
        Ok(Self::new(data, mime))
    }

    /// Encodes the file back into a data URL.
    #[must_use]
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            base64::engine::general_purpose::STANDARD.encode(&self.data)
        )
    }

    /// Returns the size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for an empty file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A generation request. Consumed once by the pipeline.
pub struct GenerationRequest {
    /// Target channel.
    pub channel: ChannelRef,
    /// Prompt text.
    pub prompt: String,
    /// Input files.
    pub files: Vec<InputFile>,
    /// Free-form parameters.
    pub parameters: ConfigMap,
    /// Caller's user id.
    pub uid: Option<u64>,
    /// Transport/session handle.
    pub session: Option<SessionHandle>,
    on_prepare_complete: Option<PrepareCallback>,
}

impl GenerationRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(channel: impl Into<ChannelRef>, prompt: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            prompt: prompt.into(),
            files: Vec::new(),
            parameters: ConfigMap::new(),
            uid: None,
            session: None,
            on_prepare_complete: None,
        }
    }

    /// Attaches a file.
    #[must_use]
    pub fn with_file(mut self, file: InputFile) -> Self {
        self.files.push(file);
        self
    }

    /// Sets a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Sets the caller's user id.
    #[must_use]
    pub fn with_uid(mut self, uid: u64) -> Self {
        self.uid = Some(uid);
        self
    }

    /// Sets the session handle.
    #[must_use]
    pub fn with_session(mut self, session: SessionHandle) -> Self {
        self.session = Some(session);
        self
    }

    /// Registers the prepare-complete callback.
    #[must_use]
    pub fn on_prepare_complete<F, Fut>(mut self, callback: F) -> Self
    where
        F: FnOnce(Vec<String>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_prepare_complete = Some(Box::new(move |hints| Box::pin(callback(hints))));
        self
    }

    /// Returns true if a prepare-complete callback is registered.
    #[must_use]
    pub fn has_prepare_callback(&self) -> bool {
        self.on_prepare_complete.is_some()
    }

    pub(crate) fn take_prepare_callback(&mut self) -> Option<PrepareCallback> {
        self.on_prepare_complete.take()
    }
}

impl fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("channel", &self.channel)
            .field("prompt", &self.prompt)
            .field("files", &self.files.len())
            .field("parameters", &self.parameters)
            .field("uid", &self.uid)
            .field("session", &self.session.is_some())
            .field("on_prepare_complete", &self.on_prepare_complete.is_some())
            .finish()
    }
}

/// The outcome of one generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Correlation id of the run.
    pub run_id: Uuid,
    /// False only if a step failed in the main walk.
    pub success: bool,
    /// Produced assets.
    #[serde(default)]
    pub output: Vec<OutputAsset>,
    /// Causal error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Request start to finalize completion.
    pub duration_ms: f64,
    /// Accumulated hints; absent when both lists are empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hints: Option<UserHints>,
    /// Diagnostic payloads keyed by step name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub diagnostics: BTreeMap<String, serde_json::Value>,
    /// One record per scheduled step, in settlement order.
    #[serde(default)]
    pub steps: Vec<StepRecord>,
}

impl GenerationResult {
    /// A failed result produced before any step ran.
    #[must_use]
    pub fn rejected(run_id: Uuid, error: impl Into<String>, duration_ms: f64) -> Self {
        Self {
            run_id,
            success: false,
            output: Vec::new(),
            error: Some(error.into()),
            duration_ms,
            hints: None,
            diagnostics: BTreeMap::new(),
            steps: Vec::new(),
        }
    }

    /// Returns the record of a step, if it was scheduled.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|record| record.name == name)
    }

    /// Returns the status of a step, if it was scheduled.
    #[must_use]
    pub fn step_status(&self, name: &str) -> Option<StepStatus> {
        self.step(name).map(|record| record.status)
    }

    /// Returns the "before" hints (empty when none).
    #[must_use]
    pub fn before_hints(&self) -> &[String] {
        self.hints
            .as_ref()
            .map(|h| h.before.as_slice())
            .unwrap_or_default()
    }

    /// Returns the "after" hints (empty when none).
    #[must_use]
    pub fn after_hints(&self) -> &[String] {
        self.hints
            .as_ref()
            .map(|h| h.after.as_slice())
            .unwrap_or_default()
    }
}
