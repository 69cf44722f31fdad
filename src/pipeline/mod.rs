//! Pipeline orchestration for committee analysis.
//!
//! # Pipeline Flow
//!
//! 1. **Init**: the query is recorded and the agent template is loaded
//! 2. **First batch**: N generation units answer the query concurrently
//! 3. **First evaluation**: the successful answers are distilled into a synthesis
//! 4. **Second batch**: N units answer again, with the synthesis as their query
//! 5. **Second evaluation**: the new answers are distilled
//! 6. **Finalize**: the last synthesis is turned into the final response
//!
//! Every stage is checkpointed to the run log. A failed checkpoint never stops
//! the run; a batch where every unit failed, or a failed evaluation or final
//! call, does.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use council::llm::LiteLlmClient;
//! use council::pipeline::{AnalysisPipeline, PipelineConfig};
//!
//! let provider = Arc::new(LiteLlmClient::from_env()?);
//! let config = PipelineConfig::from_env()?.with_num_agents(5);
//! let pipeline = AnalysisPipeline::new(config, provider)?;
//!
//! let result = pipeline.run_analysis("What are the trade-offs of event sourcing?").await?;
//! println!("{}", result.final_text);
//! println!("Log: {}", result.run_log);
//! ```
//!
//! # Progress and cancellation
//!
//! Attach an `mpsc::Sender<PipelineEvent>` with
//! [`AnalysisPipeline::with_events`] to observe stage transitions, and call
//! `cancel()` on [`AnalysisPipeline::cancel_signal`] to stop a run. Units still
//! in flight are recorded as canceled.

pub mod cancel;
pub mod compare;
pub mod config;
pub mod context;
pub mod events;
pub mod orchestrator;

// Re-export main types for convenience
pub use cancel::CancelSignal;
pub use compare::{ComparisonEntry, PromptComparison};
pub use config::{ConfigError, PipelineConfig};
pub use context::RunContext;
pub use events::{PipelineEvent, PipelineStage};
pub use orchestrator::{AnalysisPipeline, PipelineError, PipelineResult};
