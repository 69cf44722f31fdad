//! End-to-end tests of the committee pipeline through the public API, with a
//! scripted provider standing in for the model.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use council::agents::{AgentError, BatchConfig, BatchRunner};
use council::checkpoint::{load_run_log, CheckpointSink, JsonRunLog, MemoryRunLog};
use council::llm::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};
use council::pipeline::{AnalysisPipeline, PipelineConfig, PipelineEvent, RunContext};
use council::prompts::{PromptTemplate, StaticTemplates};
use council::LlmError;
use tokio::sync::mpsc;

type Script = dyn Fn(usize, &str) -> (Result<String, String>, Duration) + Send + Sync;

/// Provider whose replies are computed from the call index and prompt.
struct ScriptedCommittee {
    script: Box<Script>,
    call_count: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCommittee {
    fn new(
        script: impl Fn(usize, &str) -> (Result<String, String>, Duration) + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            call_count: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Agents echo their prompt's last line, evaluators and the final
    /// responder answer with fixed markers.
    fn deterministic() -> Self {
        Self::new(|_, prompt| {
            let reply = if prompt.starts_with("Review these responses") {
                if prompt.contains("answer to: SYNTHESIS") {
                    "SECOND SYNTHESIS".to_string()
                } else {
                    "SYNTHESIS".to_string()
                }
            } else if prompt.starts_with("Using these key insights") {
                "FINAL ANSWER".to_string()
            } else {
                format!("answer to: {}", prompt.lines().last().unwrap_or_default())
            };
            (Ok(reply), Duration::ZERO)
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("lock not poisoned").clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedCommittee {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        let prompt = request.user_prompt().unwrap_or_default().to_string();
        self.prompts
            .lock()
            .expect("lock not poisoned")
            .push(prompt.clone());

        let (reply, delay) = (self.script)(idx, &prompt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let content = reply.map_err(LlmError::Provider)?;
        Ok(GenerationResponse {
            id: format!("mock-{}", idx),
            model: "mock-model".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage::default(),
        })
    }
}

fn templates() -> Arc<StaticTemplates> {
    Arc::new(StaticTemplates::new().with_template("cotv1.md", "Reason carefully.\n{query}"))
}

fn context(provider: Arc<ScriptedCommittee>, log: Arc<MemoryRunLog>) -> RunContext {
    RunContext::new(provider, templates(), log)
}

#[tokio::test]
async fn test_full_run_persists_six_stages() {
    let dir = tempfile::tempdir().expect("tempdir");
    let provider = Arc::new(ScriptedCommittee::deterministic());
    let config = PipelineConfig::new()
        .with_num_agents(4)
        .with_results_dir(dir.path().join("analysis_results"));
    let pipeline = AnalysisPipeline::new(config, provider.clone())
        .expect("valid config")
        .with_templates(templates());

    let result = pipeline
        .run_analysis("Why do leaves change colour?")
        .await
        .expect("analysis succeeds");

    assert_eq!(result.final_text, "FINAL ANSWER");
    assert!(result.run_log.ends_with(".json"));

    let doc = load_run_log(&result.run_log).await.expect("log readable");
    let mut stages: Vec<_> = doc.iter().collect();
    stages.sort_by_key(|(_, entry)| entry.timestamp);
    let names: Vec<&str> = stages.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "initial_query",
            "first_batch",
            "evaluation_first",
            "second_batch",
            "evaluation_second",
            "final_response",
        ]
    );

    assert_eq!(doc["first_batch"].data["successful_responses"], 4);
    assert_eq!(
        doc["first_batch"].data["responses"][0][0],
        "answer to: Why do leaves change colour?"
    );
    assert_eq!(doc["second_batch"].data["responses"][3][0], "answer to: SYNTHESIS");
    assert_eq!(doc["evaluation_second"].data["evaluation"], "SECOND SYNTHESIS");

    // 4 + 1 + 4 + 1 + 1 calls; the second batch saw only the synthesis.
    let prompts = provider.prompts();
    assert_eq!(prompts.len(), 11);
    assert_eq!(
        prompts
            .iter()
            .filter(|p| p.as_str() == "Reason carefully.\nSYNTHESIS")
            .count(),
        4
    );
}

#[tokio::test]
async fn test_concurrent_runs_keep_separate_logs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = PipelineConfig::new()
        .with_num_agents(2)
        .with_results_dir(dir.path().to_path_buf());
    let pipeline = AnalysisPipeline::new(config, Arc::new(ScriptedCommittee::deterministic()))
        .expect("valid config")
        .with_templates(templates());

    let (a, b) = tokio::join!(
        pipeline.run_analysis("first question"),
        pipeline.run_analysis("second question"),
    );
    let (a, b) = (a.expect("first run"), b.expect("second run"));

    assert_ne!(a.run_id, b.run_id);
    assert_ne!(a.run_log, b.run_log);

    let doc_a = load_run_log(&a.run_log).await.expect("first log");
    let doc_b = load_run_log(&b.run_log).await.expect("second log");
    assert_eq!(doc_a["initial_query"].data["query"], "first question");
    assert_eq!(doc_b["initial_query"].data["query"], "second question");
    assert_eq!(doc_a.len(), 6);
    assert_eq!(doc_b.len(), 6);
}

#[tokio::test]
async fn test_failing_unit_is_reported_and_skipped() {
    // Unit 0 fails after the others; units 1 and 2 finish in reverse order.
    let provider = Arc::new(ScriptedCommittee::new(|idx, _| match idx {
        0 => (Err("boom".to_string()), Duration::from_millis(40)),
        1 => (Ok("A".to_string()), Duration::from_millis(20)),
        _ => (Ok("B".to_string()), Duration::ZERO),
    }));
    let log = Arc::new(MemoryRunLog::new("scenario"));
    let ctx = context(provider, log.clone());
    let template = PromptTemplate::parse("t", "{query}").expect("valid template");

    let outcome = BatchRunner::new(BatchConfig::new().with_num_agents(3))
        .run(&ctx, &template, "q", "first")
        .await
        .expect("two units succeeded");

    assert_eq!(
        outcome.successes,
        vec![("A".to_string(), 1), ("B".to_string(), 2)]
    );
    assert_eq!(outcome.errors, vec!["Agent 0 failed: boom".to_string()]);
    assert_eq!(log.snapshot().await["first_batch"].data["errors"][0], "Agent 0 failed: boom");
}

#[tokio::test]
async fn test_batch_partition_is_repeatable() {
    // Every third call fails, so each run of three units fails unit 0.
    let provider = Arc::new(ScriptedCommittee::new(|idx, _| {
        if idx % 3 == 0 {
            (Err("unlucky".to_string()), Duration::ZERO)
        } else {
            (Ok(format!("answer {}", idx % 3)), Duration::ZERO)
        }
    }));
    let log = Arc::new(MemoryRunLog::new("repeat"));
    let ctx = context(provider, log.clone());
    let template = PromptTemplate::parse("t", "{query}").expect("valid template");
    let runner = BatchRunner::new(BatchConfig::new().with_num_agents(3));

    let first = runner.run(&ctx, &template, "q", "first").await.unwrap();
    let second = runner.run(&ctx, &template, "q", "first").await.unwrap();

    assert_eq!(first.successes, second.successes);
    assert_eq!(first.errors, second.errors);
    // The re-entered stage is overwritten in the document but kept in history.
    assert_eq!(log.snapshot().await.len(), 1);
    assert_eq!(log.history().await.len(), 2);
}

#[tokio::test]
async fn test_exhausted_batch_still_writes_stage_record() {
    let provider = Arc::new(ScriptedCommittee::new(|_, _| {
        (Err("service unavailable".to_string()), Duration::ZERO)
    }));
    let log = Arc::new(MemoryRunLog::new("exhausted"));
    let ctx = context(provider, log.clone());
    let template = PromptTemplate::parse("t", "{query}").expect("valid template");

    let err = BatchRunner::new(BatchConfig::new().with_num_agents(2))
        .run(&ctx, &template, "q", "first")
        .await
        .unwrap_err();

    match err {
        AgentError::BatchExhausted { errors, .. } => assert_eq!(errors.len(), 2),
        other => panic!("unexpected error {:?}", other),
    }
    let doc = log.snapshot().await;
    assert_eq!(doc["first_batch"].data["successful_responses"], 0);
}

#[tokio::test]
async fn test_second_batch_exhaustion_keeps_partial_log() {
    // The first four calls are the first batch and its evaluation; everything
    // after that fails.
    let provider = Arc::new(ScriptedCommittee::new(|idx, prompt| {
        if idx < 3 {
            (Ok(format!("draft {}", idx)), Duration::ZERO)
        } else if idx == 3 && prompt.starts_with("Review these responses") {
            (Ok("SYNTHESIS".to_string()), Duration::ZERO)
        } else {
            (Err("quota exceeded".to_string()), Duration::ZERO)
        }
    }));
    let log = Arc::new(MemoryRunLog::new("partial"));
    let pipeline = AnalysisPipeline::new(PipelineConfig::new().with_num_agents(3), provider)
        .expect("valid config")
        .with_templates(templates());

    let err = pipeline
        .run_with_sink("q", log.clone())
        .await
        .unwrap_err();
    assert!(err.is_batch_exhausted());
    assert!(err.to_string().contains("All agents in second batch failed"));

    let stages: Vec<String> = log.history().await.into_iter().map(|r| r.stage).collect();
    assert_eq!(
        stages,
        vec![
            "initial_query",
            "first_batch",
            "evaluation_first",
            "second_batch",
            "error",
        ]
    );
    let doc = log.snapshot().await;
    assert_eq!(doc["error"].data["stage"], "second_batch");
}

#[tokio::test]
async fn test_unwritable_results_dir_does_not_stop_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("occupied");
    std::fs::write(&blocker, "not a directory").expect("write");

    let sink = Arc::new(JsonRunLog::with_run_id(blocker.join("results"), "analysis_blocked"));
    let (tx, mut rx) = mpsc::channel(256);
    let pipeline = AnalysisPipeline::new(
        PipelineConfig::new().with_num_agents(2),
        Arc::new(ScriptedCommittee::deterministic()),
    )
    .expect("valid config")
    .with_templates(templates())
    .with_events(tx);

    let result = pipeline
        .run_with_sink("q", sink.clone())
        .await
        .expect("checkpoint failures are not fatal");
    drop(pipeline);

    assert_eq!(result.final_text, "FINAL ANSWER");
    let history = sink.history().await;
    assert_eq!(history.len(), 6);
    assert!(history.iter().all(|record| !record.persisted));

    let mut failed_stages = Vec::new();
    while let Some(event) = rx.recv().await {
        if let PipelineEvent::CheckpointFailed { stage, .. } = event {
            failed_stages.push(stage);
        }
    }
    assert_eq!(failed_stages.len(), 6);
    assert_eq!(failed_stages[1], "first_batch");
}
