//! Error types for council operations.
//!
//! Defines the error types shared across subsystems:
//! - LLM API interactions (the capability boundary)
//! - Prompt template loading and formatting
//! - Run log checkpointing

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: LITELLM_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Context length exceeded: {limit} tokens")]
    ContextLengthExceeded { limit: u32 },

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    /// Opaque failure reported by a provider, carried verbatim.
    #[error("{0}")]
    Provider(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while loading or rendering prompt templates.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template '{0}' not found")]
    NotFound(String),

    #[error("Malformed template '{template}' at byte {offset}: {reason}")]
    Malformed {
        template: String,
        offset: usize,
        reason: String,
    },

    #[error("Template '{template}' does not reference the '{{{placeholder}}}' placeholder")]
    MissingPlaceholder {
        template: String,
        placeholder: String,
    },

    #[error("No value supplied for variable '{variable}' in template '{template}'")]
    MissingVariable { template: String, variable: String },

    #[error("IO error reading template '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur while writing or reading a run log.
///
/// These are reported but never abort a pipeline run.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Failed to create results directory {path}: {source}")]
    DirectoryCreationFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error on run log {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Run log {path} is not a valid JSON document: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
