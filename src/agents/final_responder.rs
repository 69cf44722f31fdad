//! Final stage: turns distilled insights into the answer.

use std::time::Instant;

use serde_json::json;

use super::error::{AgentError, AgentResult};
use crate::llm::GenerationRequest;
use crate::pipeline::RunContext;
use crate::prompts::{final_template, PromptTemplate};

/// Default sampling temperature for the final response.
pub const DEFAULT_FINAL_TEMPERATURE: f64 = 0.5;

/// Produces the final answer from the second synthesis.
#[derive(Debug, Clone)]
pub struct FinalResponder {
    temperature: f64,
    max_tokens: Option<u32>,
}

impl Default for FinalResponder {
    fn default() -> Self {
        Self::new(DEFAULT_FINAL_TEMPERATURE)
    }
}

impl FinalResponder {
    pub fn new(temperature: f64) -> Self {
        Self {
            temperature,
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Generates the final response and records `final_response`.
    ///
    /// `template` is the agent template the run used. It is not substituted
    /// into the prompt; its name is recorded alongside the response.
    pub async fn respond(
        &self,
        ctx: &RunContext,
        insights: &str,
        template: &PromptTemplate,
    ) -> AgentResult<String> {
        let start = Instant::now();
        let prompt = final_template()?.format(&[("insights", insights)])?;
        let request = GenerationRequest::prompt(ctx.model(), prompt)
            .with_temperature(self.temperature)
            .with_max_tokens_opt(self.max_tokens);

        let response = match ctx.complete_or_cancel(request).await {
            None => return Err(AgentError::Canceled("final_response".to_string())),
            Some(result) => result.map_err(|e| AgentError::FinalResponseFailed(e.to_string()))?,
        };

        let elapsed = start.elapsed();
        tracing::info!(
            template = template.name(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Final response generated"
        );

        ctx.checkpoint(
            "final_response",
            json!({
                "execution_time": elapsed.as_secs_f64(),
                "response": response,
                "template": template.name(),
            }),
        )
        .await;

        Ok(response)
    }
}
