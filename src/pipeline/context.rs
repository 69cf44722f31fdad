//! Per-run context shared by every pipeline component.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use super::cancel::CancelSignal;
use super::events::PipelineEvent;
use crate::checkpoint::CheckpointSink;
use crate::error::LlmError;
use crate::llm::{GenerationRequest, LlmProvider};
use crate::prompts::TemplateLoader;

/// Everything a component needs to take part in one analysis run.
///
/// Built once per run and passed by reference. Cloning is cheap; all handles
/// are shared.
#[derive(Clone)]
pub struct RunContext {
    provider: Arc<dyn LlmProvider>,
    templates: Arc<dyn TemplateLoader>,
    checkpoints: Arc<dyn CheckpointSink>,
    events: Option<mpsc::Sender<PipelineEvent>>,
    cancel: CancelSignal,
    model: String,
}

impl RunContext {
    /// Creates a context with no event channel, a fresh cancel signal and the
    /// provider's default model.
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        templates: Arc<dyn TemplateLoader>,
        checkpoints: Arc<dyn CheckpointSink>,
    ) -> Self {
        Self {
            provider,
            templates,
            checkpoints,
            events: None,
            cancel: CancelSignal::new(),
            model: String::new(),
        }
    }

    /// Sets the channel progress events are sent to.
    pub fn with_events(mut self, events: mpsc::Sender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Shares an existing cancel signal with this run.
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the model requested from the provider. Empty means provider default.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn templates(&self) -> &Arc<dyn TemplateLoader> {
        &self.templates
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointSink> {
        &self.checkpoints
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Identifier of the run, as assigned by the checkpoint sink.
    pub fn run_id(&self) -> &str {
        self.checkpoints.run_id()
    }

    /// Sends a progress event without waiting on the receiver.
    ///
    /// A missing or closed channel is ignored. If the receiver has fallen
    /// behind and the buffer is full, the event is dropped so a slow
    /// listener never holds up the run.
    pub fn emit(&self, event: PipelineEvent) {
        let Some(tx) = &self.events else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::debug!(
                    run_id = self.run_id(),
                    event = ?event,
                    "Event channel full; dropping progress event"
                );
            }
        }
    }

    /// Records a stage checkpoint without ever failing the run.
    ///
    /// Returns whether the write succeeded. Failures are logged and reported
    /// as a [`PipelineEvent::CheckpointFailed`] event.
    pub async fn checkpoint(&self, stage: &str, payload: Value) -> bool {
        match self.checkpoints.record(stage, payload).await {
            Ok(()) => {
                tracing::debug!(run_id = self.run_id(), stage, "Checkpoint recorded");
                true
            }
            Err(e) => {
                tracing::warn!(
                    run_id = self.run_id(),
                    stage,
                    error = %e,
                    "Failed to persist checkpoint; continuing"
                );
                self.emit(PipelineEvent::checkpoint_failed(stage, e.to_string()));
                false
            }
        }
    }

    /// Runs one completion, racing it against the cancel signal.
    ///
    /// Returns `None` if the run was cancelled first; the in-flight request
    /// is dropped.
    pub async fn complete_or_cancel(
        &self,
        request: GenerationRequest,
    ) -> Option<Result<String, LlmError>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = self.provider.complete(request) => Some(result),
        }
    }
}
