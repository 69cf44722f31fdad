//! Concurrent fan-out of generation units.
//!
//! A batch launches N units against the same template and query, waits for
//! all of them, and keeps whatever succeeded. It only fails when nothing did.

use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::json;
use tokio::sync::Semaphore;

use super::error::{AgentError, AgentResult};
use super::unit::{GenerationResult, GenerationUnit};
use crate::pipeline::{PipelineEvent, RunContext};
use crate::prompts::PromptTemplate;

/// Default number of units per batch.
pub const DEFAULT_NUM_AGENTS: usize = 10;

/// Default sampling temperature for generation units.
pub const DEFAULT_AGENT_TEMPERATURE: f64 = 0.7;

/// Configuration for a batch of generation units.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Units launched per batch.
    pub num_agents: usize,
    /// Sampling temperature for every unit.
    pub temperature: f64,
    /// Completion length limit, if any.
    pub max_tokens: Option<u32>,
    /// Per-unit time limit, if any.
    pub unit_timeout: Option<Duration>,
    /// Upper bound on units talking to the provider at once. `None` runs all.
    pub max_in_flight: Option<usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            num_agents: DEFAULT_NUM_AGENTS,
            temperature: DEFAULT_AGENT_TEMPERATURE,
            max_tokens: None,
            unit_timeout: None,
            max_in_flight: None,
        }
    }
}

impl BatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_num_agents(mut self, num_agents: usize) -> Self {
        self.num_agents = num_agents;
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

    pub fn with_unit_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.unit_timeout = timeout;
        self
    }

    pub fn with_max_in_flight(mut self, limit: Option<usize>) -> Self {
        self.max_in_flight = limit;
        self
    }
}

/// Joined results of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// `(text, unit index)` pairs in ascending index order.
    pub successes: Vec<(String, usize)>,
    /// One message per failed unit, in ascending index order.
    pub errors: Vec<String>,
    /// Wall time from launch to join.
    pub elapsed: Duration,
}

impl BatchOutcome {
    /// Splits unit results into successes and error messages, ordered by
    /// unit index regardless of completion order.
    pub fn from_results(mut results: Vec<GenerationResult>, elapsed: Duration) -> Self {
        results.sort_by_key(|r| r.index);

        let mut successes = Vec::new();
        let mut errors = Vec::new();
        for result in results {
            match result.outcome {
                Ok(text) => successes.push((text, result.index)),
                Err(failure) => errors.push(failure.to_string()),
            }
        }

        Self {
            successes,
            errors,
            elapsed,
        }
    }

    /// Checkpoint payload for the `<batch>_batch` stage.
    pub fn to_payload(&self) -> serde_json::Value {
        json!({
            "successful_responses": self.successes.len(),
            "errors": self.errors,
            "execution_time": self.elapsed.as_secs_f64(),
            "responses": self.successes,
        })
    }
}

/// Runs batches of generation units.
#[derive(Debug, Clone, Default)]
pub struct BatchRunner {
    config: BatchConfig,
}

impl BatchRunner {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Runs `num_agents` units concurrently on `query` and records the
    /// `<batch_name>_batch` checkpoint.
    ///
    /// The checkpoint is written before the outcome is judged, so an
    /// exhausted batch still leaves its errors in the run log.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::BatchExhausted` if no unit succeeded and
    /// `AgentError::ConfigurationError` if the batch has no units.
    pub async fn run(
        &self,
        ctx: &RunContext,
        template: &PromptTemplate,
        query: &str,
        batch_name: &str,
    ) -> AgentResult<BatchOutcome> {
        if self.config.num_agents == 0 {
            return Err(AgentError::ConfigurationError(
                "num_agents must be at least 1".to_string(),
            ));
        }

        tracing::info!(
            batch = batch_name,
            agents = self.config.num_agents,
            "Launching agent batch"
        );

        let start = Instant::now();
        let limiter = self.config.max_in_flight.map(|n| Semaphore::new(n.max(1)));

        let futures = (0..self.config.num_agents).map(|index| {
            let unit = GenerationUnit::new(index, self.config.temperature)
                .with_max_tokens(self.config.max_tokens)
                .with_timeout(self.config.unit_timeout);
            let limiter = limiter.as_ref();
            async move {
                let _permit = match limiter {
                    Some(semaphore) => semaphore.acquire().await.ok(),
                    None => None,
                };
                let result = unit.run(ctx, template, query).await;
                ctx.emit(PipelineEvent::agent_finished(
                    batch_name,
                    result.index,
                    result.is_success(),
                ));
                result
            }
        });

        let results = join_all(futures).await;
        let outcome = BatchOutcome::from_results(results, start.elapsed());

        tracing::info!(
            batch = batch_name,
            successes = outcome.successes.len(),
            failures = outcome.errors.len(),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Agent batch completed"
        );
        for error in &outcome.errors {
            tracing::warn!(batch = batch_name, "{}", error);
        }

        ctx.checkpoint(&format!("{}_batch", batch_name), outcome.to_payload())
            .await;
        ctx.emit(PipelineEvent::batch_completed(
            batch_name,
            outcome.successes.len(),
            outcome.errors.len(),
            outcome.elapsed.as_millis() as u64,
        ));

        if outcome.successes.is_empty() {
            return Err(AgentError::BatchExhausted {
                batch: batch_name.to_string(),
                errors: outcome.errors,
            });
        }

        Ok(outcome)
    }
}
