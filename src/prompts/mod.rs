//! Prompt templates for agent batches and synthesis stages.
//!
//! - [`template`] - `{placeholder}` templates parsed at load time
//! - [`loader`] - the template loading boundary (filesystem or in-memory)
//! - [`stages`] - built-in evaluator and final-answer prompts
//!
//! ```no_run
//! # async fn demo() -> Result<(), council::error::TemplateError> {
//! use council::prompts::{FsTemplateLoader, TemplateLoader};
//!
//! let loader = FsTemplateLoader::new("prompts");
//! let template = loader.load("cotv1.md").await?;
//! let prompt = template.format_query("How do tides work?")?;
//! # Ok(())
//! # }
//! ```

pub mod loader;
pub mod stages;
pub mod template;

pub use loader::{FsTemplateLoader, StaticTemplates, TemplateLoader};
pub use stages::{evaluator_template, final_template, format_responses, EVALUATOR_PROMPT, FINAL_PROMPT};
pub use template::PromptTemplate;
