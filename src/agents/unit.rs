//! A single generation unit: one prompt, one completion, never an error.

use std::time::Duration;

use thiserror::Error;

use crate::llm::GenerationRequest;
use crate::pipeline::RunContext;
use crate::prompts::PromptTemplate;

/// Why a unit produced no text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitFailure {
    /// The capability, or prompt formatting, reported an error.
    #[error("Agent {index} failed: {message}")]
    Capability { index: usize, message: String },

    /// The capability did not answer within the unit's time limit.
    #[error("Agent {index} failed: timed out after {:.2}s", limit.as_secs_f64())]
    TimedOut { index: usize, limit: Duration },

    /// The run was cancelled before the unit completed.
    #[error("Agent {index} canceled")]
    Canceled { index: usize },
}

impl UnitFailure {
    pub fn index(&self) -> usize {
        match self {
            UnitFailure::Capability { index, .. }
            | UnitFailure::TimedOut { index, .. }
            | UnitFailure::Canceled { index } => *index,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, UnitFailure::Canceled { .. })
    }
}

/// Outcome of one unit. Exactly one of text or error is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub index: usize,
    pub outcome: Result<String, UnitFailure>,
}

impl GenerationResult {
    pub fn text(&self) -> Option<&str> {
        self.outcome.as_deref().ok()
    }

    pub fn error(&self) -> Option<String> {
        self.outcome.as_ref().err().map(|e| e.to_string())
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Produces one candidate answer by filling a template with the query.
#[derive(Debug, Clone)]
pub struct GenerationUnit {
    index: usize,
    temperature: f64,
    max_tokens: Option<u32>,
    timeout: Option<Duration>,
}

impl GenerationUnit {
    /// Creates unit `index` sampling at `temperature`.
    pub fn new(index: usize, temperature: f64) -> Self {
        Self {
            index,
            temperature,
            max_tokens: None,
            timeout: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Bounds how long the unit waits for the capability.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Runs the unit. Every failure is captured in the result.
    pub async fn run(
        &self,
        ctx: &RunContext,
        template: &PromptTemplate,
        query: &str,
    ) -> GenerationResult {
        let outcome = match template.format_query(query) {
            Ok(prompt) => {
                let request = GenerationRequest::prompt(ctx.model(), prompt)
                    .with_temperature(self.temperature)
                    .with_max_tokens_opt(self.max_tokens);

                tokio::select! {
                    biased;
                    _ = ctx.cancel_signal().cancelled() => Err(UnitFailure::Canceled { index: self.index }),
                    result = self.invoke(ctx, request) => result,
                }
            }
            Err(e) => Err(UnitFailure::Capability {
                index: self.index,
                message: e.to_string(),
            }),
        };

        if let Err(failure) = &outcome {
            tracing::debug!(agent = self.index, error = %failure, "Generation unit failed");
        }

        GenerationResult {
            index: self.index,
            outcome,
        }
    }

    async fn invoke(
        &self,
        ctx: &RunContext,
        request: GenerationRequest,
    ) -> Result<String, UnitFailure> {
        let call = ctx.provider().complete(request);
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(UnitFailure::TimedOut {
                        index: self.index,
                        limit,
                    })
                }
            },
            None => call.await,
        };

        result.map_err(|e| UnitFailure::Capability {
            index: self.index,
            message: e.to_string(),
        })
    }
}
