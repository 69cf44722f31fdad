//! council: two-round committee analysis with LLM agents.
//!
//! A query is answered by a batch of concurrent agents, their answers are
//! distilled into a synthesis, a second batch works from that synthesis, and a
//! final answer is written from the second synthesis. Every stage is
//! checkpointed to a per-run log.

pub mod agents;
pub mod checkpoint;
pub mod cli;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod prompts;

// Re-export commonly used types
pub use error::{CheckpointError, LlmError, TemplateError};
pub use pipeline::{AnalysisPipeline, PipelineConfig, PipelineError, PipelineResult};
