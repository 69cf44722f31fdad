//! Evaluator stage: distils a batch's responses into one synthesis.

use std::time::Instant;

use serde_json::json;

use super::error::{AgentError, AgentResult};
use crate::llm::GenerationRequest;
use crate::pipeline::RunContext;
use crate::prompts::{evaluator_template, format_responses};

/// Default sampling temperature for the evaluator.
pub const DEFAULT_EVALUATOR_TEMPERATURE: f64 = 0.3;

/// Produces a synthesis of the best insights across a batch.
#[derive(Debug, Clone)]
pub struct Synthesizer {
    temperature: f64,
    max_tokens: Option<u32>,
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new(DEFAULT_EVALUATOR_TEMPERATURE)
    }
}

impl Synthesizer {
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

    /// Synthesizes `responses` and records `evaluation_<stage>`.
    ///
    /// Responses are presented to the evaluator in the order given, each
    /// labeled with its unit index.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::SynthesisFailed` if there is nothing to evaluate
    /// or the capability fails, and `AgentError::Canceled` if the run is
    /// cancelled first. No checkpoint is written in either case.
    pub async fn synthesize(
        &self,
        ctx: &RunContext,
        responses: &[(String, usize)],
        stage: &str,
    ) -> AgentResult<String> {
        if responses.is_empty() {
            return Err(AgentError::SynthesisFailed {
                stage: stage.to_string(),
                reason: "no responses to evaluate".to_string(),
            });
        }

        let start = Instant::now();
        let review = format_responses(responses);
        let prompt = evaluator_template()?.format(&[("responses", review.as_str())])?;
        let request = GenerationRequest::prompt(ctx.model(), prompt)
            .with_temperature(self.temperature)
            .with_max_tokens_opt(self.max_tokens);

        let stage_name = format!("evaluation_{}", stage);
        let evaluation = match ctx.complete_or_cancel(request).await {
            None => return Err(AgentError::Canceled(stage_name)),
            Some(result) => result.map_err(|e| AgentError::SynthesisFailed {
                stage: stage.to_string(),
                reason: e.to_string(),
            })?,
        };

        let elapsed = start.elapsed();
        tracing::info!(
            stage,
            responses = responses.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Evaluation completed"
        );

        ctx.checkpoint(
            &stage_name,
            json!({
                "execution_time": elapsed.as_secs_f64(),
                "evaluation": evaluation,
            }),
        )
        .await;

        Ok(evaluation)
    }
}
