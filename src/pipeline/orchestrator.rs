//! Pipeline controller: drives one analysis run through its stages.
//!
//! ```text
//! Init -> FirstBatch -> FirstEval -> SecondBatch -> SecondEval -> Finalize -> Done
//!   \________\____________\____________\_____________\____________\-> Failed
//! ```
//!
//! The second batch receives the first synthesis as its entire query. The
//! final responder sees only the second synthesis.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;

use super::cancel::CancelSignal;
use super::config::{ConfigError, PipelineConfig};
use super::context::RunContext;
use super::events::{PipelineEvent, PipelineStage};
use crate::agents::{AgentError, BatchRunner};
use crate::checkpoint::{CheckpointSink, JsonRunLog};
use crate::error::TemplateError;
use crate::llm::LlmProvider;
use crate::prompts::{FsTemplateLoader, TemplateLoader};

/// Errors that end an analysis run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The agent template could not be loaded or is unusable.
    #[error("Failed to load prompt template: {0}")]
    Template(#[from] TemplateError),

    /// A stage failed.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// The pipeline configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The run was cancelled.
    #[error("Analysis canceled at stage {0}")]
    Canceled(PipelineStage),
}

impl PipelineError {
    /// Returns true if every unit of a batch failed.
    pub fn is_batch_exhausted(&self) -> bool {
        matches!(self, PipelineError::Agent(AgentError::BatchExhausted { .. }))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, PipelineError::Canceled(_))
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// The final response.
    pub final_text: String,
    /// Identifier of the run.
    pub run_id: String,
    /// Where the run log lives.
    pub run_log: String,
    /// Wall time of the whole run.
    pub elapsed: Duration,
}

/// Runs the two-round committee analysis.
pub struct AnalysisPipeline {
    config: PipelineConfig,
    provider: Arc<dyn LlmProvider>,
    templates: Arc<dyn TemplateLoader>,
    events: Option<mpsc::Sender<PipelineEvent>>,
    cancel: CancelSignal,
}

impl AnalysisPipeline {
    /// Creates a pipeline that loads templates from `config.prompts_dir`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if the configuration is invalid.
    pub fn new(
        config: PipelineConfig,
        provider: Arc<dyn LlmProvider>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let templates = Arc::new(FsTemplateLoader::new(config.prompts_dir.clone()));
        Ok(Self {
            config,
            provider,
            templates,
            events: None,
            cancel: CancelSignal::new(),
        })
    }

    /// Replaces the template source.
    pub fn with_templates(mut self, templates: Arc<dyn TemplateLoader>) -> Self {
        self.templates = templates;
        self
    }

    /// Sends progress events to `events`.
    pub fn with_events(mut self, events: mpsc::Sender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Uses an externally owned cancel signal.
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns a handle that cancels runs of this pipeline.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs an analysis, logging checkpoints to a new JSON run log under
    /// `config.results_dir`.
    pub async fn run_analysis(&self, query: &str) -> Result<PipelineResult, PipelineError> {
        let sink = Arc::new(JsonRunLog::create(self.config.results_dir.clone()).await);
        self.run_with_sink(query, sink).await
    }

    /// Runs an analysis, logging checkpoints to `sink`.
    ///
    /// On failure the `error` stage is recorded with the message and the
    /// stage that failed, then the error is returned.
    pub async fn run_with_sink(
        &self,
        query: &str,
        sink: Arc<dyn CheckpointSink>,
    ) -> Result<PipelineResult, PipelineError> {
        let ctx = self.context(sink.clone());
        let run_id = sink.run_id().to_string();
        let start = Instant::now();

        tracing::info!(run_id = %run_id, log = %sink.location(), "Starting analysis");
        ctx.emit(PipelineEvent::run_started(&run_id, query));

        let mut stage = PipelineStage::Init;
        match self.execute(&ctx, query, &mut stage).await {
            Ok(final_text) => {
                let elapsed = start.elapsed();
                tracing::info!(
                    run_id = %run_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Analysis complete"
                );
                ctx.emit(PipelineEvent::stage_started(PipelineStage::Done));
                ctx.emit(PipelineEvent::run_completed(&run_id, elapsed.as_millis() as u64));

                Ok(PipelineResult {
                    final_text,
                    run_id,
                    run_log: sink.location(),
                    elapsed,
                })
            }
            Err(err) => {
                tracing::error!(run_id = %run_id, stage = %stage, error = %err, "Analysis failed");
                ctx.checkpoint(
                    "error",
                    json!({
                        "error": err.to_string(),
                        "stage": stage.to_string(),
                    }),
                )
                .await;
                ctx.emit(PipelineEvent::stage_started(PipelineStage::Failed));
                ctx.emit(PipelineEvent::run_failed(stage, err.to_string()));
                Err(err)
            }
        }
    }

    fn context(&self, sink: Arc<dyn CheckpointSink>) -> RunContext {
        let ctx = RunContext::new(self.provider.clone(), self.templates.clone(), sink)
            .with_cancel(self.cancel.clone())
            .with_model(self.config.model.clone());
        match &self.events {
            Some(tx) => ctx.with_events(tx.clone()),
            None => ctx,
        }
    }

    async fn execute(
        &self,
        ctx: &RunContext,
        query: &str,
        stage: &mut PipelineStage,
    ) -> Result<String, PipelineError> {
        let started = self.enter(ctx, stage, PipelineStage::Init)?;
        ctx.checkpoint("initial_query", json!({ "query": query }))
            .await;
        let template = ctx.templates().load(&self.config.template_name).await?;
        template.require("query")?;
        self.finish(ctx, *stage, started);

        let runner = BatchRunner::new(self.config.batch_config());
        let synthesizer = self.config.synthesizer();
        let responder = self.config.final_responder();

        let started = self.enter(ctx, stage, PipelineStage::FirstBatch)?;
        let first = runner
            .run(ctx, &template, query, "first")
            .await
            .map_err(|e| self.stage_error(ctx, *stage, e))?;
        self.finish(ctx, *stage, started);

        let started = self.enter(ctx, stage, PipelineStage::FirstEval)?;
        let first_eval = synthesizer
            .synthesize(ctx, &first.successes, "first")
            .await
            .map_err(|e| self.stage_error(ctx, *stage, e))?;
        self.finish(ctx, *stage, started);

        let started = self.enter(ctx, stage, PipelineStage::SecondBatch)?;
        let second = runner
            .run(ctx, &template, &first_eval, "second")
            .await
            .map_err(|e| self.stage_error(ctx, *stage, e))?;
        self.finish(ctx, *stage, started);

        let started = self.enter(ctx, stage, PipelineStage::SecondEval)?;
        let second_eval = synthesizer
            .synthesize(ctx, &second.successes, "second")
            .await
            .map_err(|e| self.stage_error(ctx, *stage, e))?;
        self.finish(ctx, *stage, started);

        let started = self.enter(ctx, stage, PipelineStage::Finalize)?;
        let final_text = responder
            .respond(ctx, &second_eval, &template)
            .await
            .map_err(|e| self.stage_error(ctx, *stage, e))?;
        self.finish(ctx, *stage, started);

        *stage = PipelineStage::Done;
        Ok(final_text)
    }

    /// Moves to `next` unless the run has been cancelled.
    fn enter(
        &self,
        ctx: &RunContext,
        stage: &mut PipelineStage,
        next: PipelineStage,
    ) -> Result<Instant, PipelineError> {
        if ctx.cancel_signal().is_cancelled() {
            return Err(PipelineError::Canceled(*stage));
        }

        *stage = next;
        tracing::info!(run_id = ctx.run_id(), stage = %next, "{}", next.description());
        ctx.emit(PipelineEvent::stage_started(next));
        Ok(Instant::now())
    }

    fn finish(&self, ctx: &RunContext, stage: PipelineStage, started: Instant) {
        ctx.emit(PipelineEvent::stage_completed(
            stage,
            started.elapsed().as_millis() as u64,
        ));
    }

    /// Reports stage failures caused by cancellation as cancellation.
    fn stage_error(&self, ctx: &RunContext, stage: PipelineStage, err: AgentError) -> PipelineError {
        if err.is_canceled() || ctx.cancel_signal().is_cancelled() {
            PipelineError::Canceled(stage)
        } else {
            PipelineError::Agent(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::ScriptedProvider;
    use crate::checkpoint::{load_run_log, MemoryRunLog, StageRecord};
    use crate::error::{CheckpointError, TemplateError};
    use crate::prompts::StaticTemplates;
    use async_trait::async_trait;
    use serde_json::Value;

    const TEMPLATE: &str = "cotv1.md";

    fn templates() -> Arc<StaticTemplates> {
        Arc::new(StaticTemplates::new().with_template(TEMPLATE, "Think carefully. {query}"))
    }

    fn pipeline(provider: Arc<ScriptedProvider>, num_agents: usize) -> AnalysisPipeline {
        let config = PipelineConfig::new().with_num_agents(num_agents);
        AnalysisPipeline::new(config, provider)
            .unwrap()
            .with_templates(templates())
    }

    fn stages(history: &[StageRecord]) -> Vec<&str> {
        history.iter().map(|r| r.stage.as_str()).collect()
    }

    /// Three units per batch: first batch "r0".."r2", "SYN1", second batch
    /// "s0".."s2", "SYN2", "FINAL".
    fn happy_provider() -> ScriptedProvider {
        ScriptedProvider::always("unused")
            .then_ok("r0")
            .then_ok("r1")
            .then_ok("r2")
            .then_ok("SYN1")
            .then_ok("s0")
            .then_ok("s1")
            .then_ok("s2")
            .then_ok("SYN2")
            .then_ok("FINAL")
    }

    #[tokio::test]
    async fn test_full_run_records_every_stage_in_order() {
        let provider = Arc::new(happy_provider());
        let log = Arc::new(MemoryRunLog::new("run"));

        let result = pipeline(provider.clone(), 3)
            .run_with_sink("What is 2+2?", log.clone())
            .await
            .unwrap();

        assert_eq!(result.final_text, "FINAL");
        assert_eq!(result.run_id, "run");
        assert_eq!(result.run_log, "memory://run");

        let history = log.history().await;
        assert_eq!(
            stages(&history),
            vec![
                "initial_query",
                "first_batch",
                "evaluation_first",
                "second_batch",
                "evaluation_second",
                "final_response",
            ]
        );
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(provider.calls(), 9);
    }

    #[tokio::test]
    async fn test_second_batch_query_is_first_synthesis() {
        let provider = Arc::new(happy_provider());
        let log = Arc::new(MemoryRunLog::new("run"));

        pipeline(provider.clone(), 3)
            .run_with_sink("What is 2+2?", log)
            .await
            .unwrap();

        let prompts = provider.prompts();
        assert_eq!(prompts[0], "Think carefully. What is 2+2?");
        for prompt in &prompts[4..7] {
            assert_eq!(prompt, "Think carefully. SYN1");
        }
        assert!(prompts[7].contains("Response 0:\ns0"));
        assert!(prompts[8].contains("SYN2"));
        assert!(!prompts[8].contains("What is 2+2?"));
    }

    #[tokio::test]
    async fn test_exhausted_first_batch_stops_run() {
        let provider = Arc::new(ScriptedProvider::failing("down"));
        let log = Arc::new(MemoryRunLog::new("run"));

        let err = pipeline(provider.clone(), 3)
            .run_with_sink("q", log.clone())
            .await
            .unwrap_err();

        assert!(err.is_batch_exhausted());
        assert_eq!(provider.calls(), 3);

        let doc = log.snapshot().await;
        assert_eq!(doc["first_batch"].data["errors"].as_array().unwrap().len(), 3);
        assert!(!doc.contains_key("evaluation_first"));
        let error = doc["error"].data["error"].as_str().unwrap();
        assert!(error.starts_with("All agents in first batch failed"));
        assert_eq!(doc["error"].data["stage"], "first_batch");
    }

    #[tokio::test]
    async fn test_missing_template_fails_before_any_batch() {
        let provider = Arc::new(ScriptedProvider::always("x"));
        let log = Arc::new(MemoryRunLog::new("run"));
        let pipeline = AnalysisPipeline::new(
            PipelineConfig::new().with_template_name("absent.md"),
            provider.clone(),
        )
        .unwrap()
        .with_templates(templates());

        let err = pipeline.run_with_sink("q", log.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Template(TemplateError::NotFound(_))
        ));
        assert_eq!(provider.calls(), 0);
        assert_eq!(
            stages(&log.history().await),
            vec!["initial_query", "error"]
        );
    }

    #[tokio::test]
    async fn test_template_without_query_placeholder_is_rejected() {
        let provider = Arc::new(ScriptedProvider::always("x"));
        let log = Arc::new(MemoryRunLog::new("run"));
        let pipeline = pipeline(provider.clone(), 2).with_templates(Arc::new(
            StaticTemplates::new().with_template(TEMPLATE, "No placeholder"),
        ));

        let err = pipeline.run_with_sink("q", log).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Template(TemplateError::MissingPlaceholder { .. })
        ));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_synthesis_failure_is_fatal() {
        let provider = Arc::new(
            ScriptedProvider::always("unused")
                .then_ok("r0")
                .then_ok("r1")
                .then_err("evaluator offline"),
        );
        let log = Arc::new(MemoryRunLog::new("run"));

        let err = pipeline(provider, 2)
            .run_with_sink("q", log.clone())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Agent(AgentError::SynthesisFailed { .. })
        ));
        let doc = log.snapshot().await;
        assert_eq!(doc["error"].data["stage"], "first_eval");
        assert!(!doc.contains_key("second_batch"));
    }

    #[tokio::test]
    async fn test_cancel_before_run() {
        let provider = Arc::new(ScriptedProvider::always("x"));
        let log = Arc::new(MemoryRunLog::new("run"));
        let pipeline = pipeline(provider.clone(), 2);
        pipeline.cancel_signal().cancel();

        let err = pipeline.run_with_sink("q", log.clone()).await.unwrap_err();
        assert!(err.is_canceled());
        assert_eq!(provider.calls(), 0);
        assert_eq!(stages(&log.history().await), vec!["error"]);
    }

    #[tokio::test]
    async fn test_cancel_during_batch_marks_units() {
        let provider = Arc::new(
            ScriptedProvider::always("x").with_delay(std::time::Duration::from_secs(30)),
        );
        let log = Arc::new(MemoryRunLog::new("run"));
        let pipeline = pipeline(provider, 2);
        let cancel = pipeline.cancel_signal();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = pipeline.run_with_sink("q", log.clone()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Canceled(PipelineStage::FirstBatch)));

        let doc = log.snapshot().await;
        assert_eq!(
            doc["first_batch"].data["errors"],
            serde_json::json!(["Agent 0 canceled", "Agent 1 canceled"])
        );
        assert_eq!(doc["error"].data["stage"], "first_batch");
    }

    struct FailingSink {
        attempts: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl CheckpointSink for FailingSink {
        fn run_id(&self) -> &str {
            "unwritable"
        }

        fn location(&self) -> String {
            "/dev/null/unwritable.json".to_string()
        }

        async fn record(&self, _stage: &str, _payload: Value) -> Result<(), CheckpointError> {
            self.attempts
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(CheckpointError::Io {
                path: self.location(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            })
        }

        async fn history(&self) -> Vec<StageRecord> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_stop_run() {
        let provider = Arc::new(happy_provider());
        let sink = Arc::new(FailingSink {
            attempts: std::sync::atomic::AtomicUsize::new(0),
        });
        let (tx, mut rx) = mpsc::channel(128);

        let result = pipeline(provider, 3)
            .with_events(tx)
            .run_with_sink("q", sink.clone())
            .await
            .unwrap();

        assert_eq!(result.final_text, "FINAL");
        assert_eq!(sink.attempts.load(std::sync::atomic::Ordering::SeqCst), 6);

        let mut checkpoint_failures = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, PipelineEvent::CheckpointFailed { .. }) {
                checkpoint_failures += 1;
            }
        }
        assert_eq!(checkpoint_failures, 6);
    }

    #[tokio::test]
    async fn test_run_analysis_writes_json_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PipelineConfig::new()
            .with_num_agents(3)
            .with_results_dir(dir.path().join("analysis_results"));
        let pipeline = AnalysisPipeline::new(config, Arc::new(happy_provider()))
            .unwrap()
            .with_templates(templates());

        let result = pipeline.run_analysis("What is 2+2?").await.unwrap();
        assert!(result.run_id.starts_with("analysis_"));

        let doc = load_run_log(&result.run_log).await.unwrap();
        assert_eq!(doc.len(), 6);
        assert_eq!(doc["initial_query"].data["query"], "What is 2+2?");
        assert_eq!(doc["final_response"].data["response"], "FINAL");
    }

    #[tokio::test]
    async fn test_stage_events_in_order() {
        let (tx, mut rx) = mpsc::channel(128);
        let log = Arc::new(MemoryRunLog::new("run"));

        pipeline(Arc::new(happy_provider()), 3)
            .with_events(tx)
            .run_with_sink("q", log)
            .await
            .unwrap();

        let mut started = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::StageStarted { stage, .. } = event {
                started.push(stage);
            }
        }
        assert_eq!(
            started,
            vec![
                PipelineStage::Init,
                PipelineStage::FirstBatch,
                PipelineStage::FirstEval,
                PipelineStage::SecondBatch,
                PipelineStage::SecondEval,
                PipelineStage::Finalize,
                PipelineStage::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_unread_event_channel_does_not_stall_run() {
        let (tx, mut rx) = mpsc::channel(4);
        let log = Arc::new(MemoryRunLog::new("run"));
        let pipeline = pipeline(Arc::new(ScriptedProvider::always("answer")), 10).with_events(tx);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.run_with_sink("q", log.clone()),
        )
        .await
        .expect("run finishes while the receiver is idle")
        .unwrap();

        assert_eq!(result.final_text, "answer");
        assert_eq!(log.history().await.len(), 6);
        // Only the buffered prefix is delivered.
        let mut delivered = 0;
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 4);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = AnalysisPipeline::new(
            PipelineConfig::new().with_num_agents(0),
            Arc::new(ScriptedProvider::always("x")),
        );
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
