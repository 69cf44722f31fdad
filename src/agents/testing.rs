//! Scripted LLM provider shared by the crate's unit tests.
//!
//! Replies are handed out by call order. Units of a batch issue their first
//! request in index order, so step `i` of a fresh provider belongs to unit `i`
//! of the first batch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::llm::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};

#[derive(Debug, Clone)]
struct Step {
    reply: Result<String, String>,
    delay: Duration,
}

pub(crate) struct ScriptedProvider {
    steps: Vec<Step>,
    fallback: Step,
    call_count: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    /// Answers every call with `reply`.
    pub(crate) fn always(reply: &str) -> Self {
        Self {
            steps: Vec::new(),
            fallback: Step {
                reply: Ok(reply.to_string()),
                delay: Duration::ZERO,
            },
            call_count: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Fails every call with `message`.
    pub(crate) fn failing(message: &str) -> Self {
        let mut provider = Self::always("");
        provider.fallback.reply = Err(message.to_string());
        provider
    }

    /// Delays every unscripted call.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.fallback.delay = delay;
        self
    }

    pub(crate) fn then_ok(self, reply: &str) -> Self {
        self.then_ok_after(reply, Duration::ZERO)
    }

    pub(crate) fn then_ok_after(mut self, reply: &str, delay: Duration) -> Self {
        self.steps.push(Step {
            reply: Ok(reply.to_string()),
            delay,
        });
        self
    }

    pub(crate) fn then_err(mut self, message: &str) -> Self {
        self.steps.push(Step {
            reply: Err(message.to_string()),
            delay: Duration::ZERO,
        });
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// User prompts received so far, in call order.
    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("lock not poisoned").clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .expect("lock not poisoned")
            .push(request.user_prompt().unwrap_or_default().to_string());

        let step = self.steps.get(idx).unwrap_or(&self.fallback).clone();
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }

        let content = step.reply.map_err(LlmError::Provider)?;
        Ok(GenerationResponse {
            id: format!("mock-{}", idx),
            model: "mock-model".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage {
                prompt_tokens: 100,
                completion_tokens: 200,
                total_tokens: 300,
            },
        })
    }
}
