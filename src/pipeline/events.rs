//! Progress events emitted while a run advances.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// States of the analysis state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Init,
    FirstBatch,
    FirstEval,
    SecondBatch,
    SecondEval,
    Finalize,
    Done,
    Failed,
}

impl PipelineStage {
    /// Status line shown to a user when the stage begins.
    pub fn description(&self) -> &'static str {
        match self {
            PipelineStage::Init => "Recording query and loading prompt template...",
            PipelineStage::FirstBatch => "Running first batch of agents...",
            PipelineStage::FirstEval => "Evaluating first batch results...",
            PipelineStage::SecondBatch => "Running second batch with refined insights...",
            PipelineStage::SecondEval => "Evaluating second batch results...",
            PipelineStage::Finalize => "Generating final response...",
            PipelineStage::Done => "Analysis complete",
            PipelineStage::Failed => "Analysis failed",
        }
    }

    /// Returns true for `Done` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Failed)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Init => "init",
            PipelineStage::FirstBatch => "first_batch",
            PipelineStage::FirstEval => "first_eval",
            PipelineStage::SecondBatch => "second_batch",
            PipelineStage::SecondEval => "second_eval",
            PipelineStage::Finalize => "finalize",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Events emitted during an analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// A run has started.
    RunStarted {
        run_id: String,
        query: String,
        timestamp: DateTime<Utc>,
    },
    /// The state machine entered a new stage.
    StageStarted {
        stage: PipelineStage,
        timestamp: DateTime<Utc>,
    },
    /// One generation unit finished, successfully or not.
    AgentFinished {
        batch: String,
        index: usize,
        succeeded: bool,
        timestamp: DateTime<Utc>,
    },
    /// A batch has been joined.
    BatchCompleted {
        batch: String,
        successes: usize,
        failures: usize,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A stage finished without error.
    StageCompleted {
        stage: PipelineStage,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A checkpoint could not be persisted. The run continues.
    CheckpointFailed {
        stage: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// The run produced a final response.
    RunCompleted {
        run_id: String,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// The run stopped with an error.
    RunFailed {
        stage: PipelineStage,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Creates a RunStarted event.
    pub fn run_started(run_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self::RunStarted {
            run_id: run_id.into(),
            query: query.into(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a StageStarted event.
    pub fn stage_started(stage: PipelineStage) -> Self {
        Self::StageStarted {
            stage,
            timestamp: Utc::now(),
        }
    }

    /// Creates an AgentFinished event.
    pub fn agent_finished(batch: impl Into<String>, index: usize, succeeded: bool) -> Self {
        Self::AgentFinished {
            batch: batch.into(),
            index,
            succeeded,
            timestamp: Utc::now(),
        }
    }

    /// Creates a BatchCompleted event.
    pub fn batch_completed(
        batch: impl Into<String>,
        successes: usize,
        failures: usize,
        elapsed_ms: u64,
    ) -> Self {
        Self::BatchCompleted {
            batch: batch.into(),
            successes,
            failures,
            elapsed_ms,
            timestamp: Utc::now(),
        }
    }

    /// Creates a StageCompleted event.
    pub fn stage_completed(stage: PipelineStage, elapsed_ms: u64) -> Self {
        Self::StageCompleted {
            stage,
            elapsed_ms,
            timestamp: Utc::now(),
        }
    }

    /// Creates a CheckpointFailed event.
    pub fn checkpoint_failed(stage: impl Into<String>, error: impl Into<String>) -> Self {
        Self::CheckpointFailed {
            stage: stage.into(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a RunCompleted event.
    pub fn run_completed(run_id: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::RunCompleted {
            run_id: run_id.into(),
            elapsed_ms,
            timestamp: Utc::now(),
        }
    }

    /// Creates a RunFailed event.
    pub fn run_failed(stage: PipelineStage, error: impl Into<String>) -> Self {
        Self::RunFailed {
            stage,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}
