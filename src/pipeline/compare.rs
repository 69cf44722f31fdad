//! Side-by-side comparison of prompt templates on one query.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;

use super::config::ConfigError;
use super::context::RunContext;
use super::orchestrator::PipelineError;
use crate::agents::{GenerationUnit, DEFAULT_AGENT_TEMPERATURE};
use crate::checkpoint::MemoryRunLog;
use crate::llm::LlmProvider;
use crate::prompts::TemplateLoader;

/// One template's answer in a comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonEntry {
    /// Template name.
    pub template: String,
    /// The generated text, or the failure message.
    pub outcome: Result<String, String>,
    /// Time spent waiting for this template's answer.
    pub elapsed: Duration,
}

/// Runs one generation per template, concurrently, against the same query.
pub struct PromptComparison {
    provider: Arc<dyn LlmProvider>,
    templates: Arc<dyn TemplateLoader>,
    model: String,
    temperature: f64,
    max_tokens: Option<u32>,
}

impl PromptComparison {
    pub fn new(provider: Arc<dyn LlmProvider>, templates: Arc<dyn TemplateLoader>) -> Self {
        Self {
            provider,
            templates,
            model: String::new(),
            temperature: DEFAULT_AGENT_TEMPERATURE,
            max_tokens: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Compares `names` on `query`. Entries come back in the order given.
    ///
    /// All templates are loaded before anything is generated; a template
    /// that fails to load aborts the comparison. Generation failures are
    /// reported per entry.
    pub async fn compare(
        &self,
        names: &[String],
        query: &str,
    ) -> Result<Vec<ComparisonEntry>, PipelineError> {
        if names.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "at least one template is required".to_string(),
            )
            .into());
        }

        let mut loaded = Vec::with_capacity(names.len());
        for name in names {
            let template = self.templates.load(name).await?;
            template.require("query")?;
            loaded.push(template);
        }

        let ctx = RunContext::new(
            self.provider.clone(),
            self.templates.clone(),
            Arc::new(MemoryRunLog::new("comparison")),
        )
        .with_model(self.model.clone());
        let ctx = &ctx;

        let futures = loaded.iter().enumerate().map(|(index, template)| {
            let unit = GenerationUnit::new(index, self.temperature).with_max_tokens(self.max_tokens);
            async move {
                let start = Instant::now();
                let result = unit.run(ctx, template, query).await;
                let elapsed = start.elapsed();
                tracing::info!(
                    template = template.name(),
                    success = result.is_success(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Template run finished"
                );
                ComparisonEntry {
                    template: template.name().to_string(),
                    outcome: result.outcome.map_err(|e| e.to_string()),
                    elapsed,
                }
            }
        });

        Ok(join_all(futures).await)
    }
}
