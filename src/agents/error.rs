//! Error types for the agent committee.
//!
//! Individual unit failures never surface here; they are collected by the
//! batch runner. These errors are the ones that stop a run.

use thiserror::Error;

/// Errors that can occur during agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Every unit of a batch failed.
    #[error("All agents in {batch} batch failed: {errors:?}")]
    BatchExhausted { batch: String, errors: Vec<String> },

    /// The evaluator could not produce a synthesis.
    #[error("Evaluation failed at stage {stage}: {reason}")]
    SynthesisFailed { stage: String, reason: String },

    /// The final response could not be generated.
    #[error("Final response generation failed: {0}")]
    FinalResponseFailed(String),

    /// The run was cancelled while the named step was in progress.
    #[error("Canceled during {0}")]
    Canceled(String),

    /// Configuration error.
    #[error("Agent configuration error: {0}")]
    ConfigurationError(String),

    /// Underlying template error.
    #[error("Template error: {0}")]
    Template(#[from] crate::error::TemplateError),
}

impl AgentError {
    /// Returns true if the error was caused by cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, AgentError::Canceled(_))
    }
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
