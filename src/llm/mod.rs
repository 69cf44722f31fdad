//! LLM integration for council.
//!
//! Every agent in a run shares a single [`LlmProvider`] handle. The pipeline
//! treats the provider as an opaque, possibly-failing function; transient
//! failures are retried inside [`OpenRouterProvider`] and nowhere else.
//!
//! ```ignore
//! use council::llm::{GenerationRequest, LiteLlmClient, LlmProvider};
//!
//! let client = LiteLlmClient::from_env()?;
//! let text = client
//!     .complete(GenerationRequest::prompt("", "Summarize the CAP theorem"))
//!     .await?;
//! ```

pub mod litellm;
pub mod providers;

pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
};
pub use providers::OpenRouterProvider;
