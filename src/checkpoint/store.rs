//! Stage records, the checkpoint sink trait, and an in-memory run log.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::CheckpointError;

/// One stage's entry as persisted in a run log document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEntry {
    /// When the stage was recorded.
    pub timestamp: DateTime<Utc>,
    /// Stage-specific payload.
    pub data: Value,
}

/// A persisted run log: stage name to its latest entry.
pub type RunLogDocument = BTreeMap<String, StageEntry>;

/// A single checkpoint event, as kept in a sink's append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name, e.g. `first_batch` or `evaluation_second`.
    pub stage: String,
    /// When the stage was recorded. Never earlier than the previous record.
    pub timestamp: DateTime<Utc>,
    /// Stage-specific payload.
    pub payload: Value,
    /// Whether the record reached the log's storage.
    #[serde(default)]
    pub persisted: bool,
}

impl StageRecord {
    /// Converts the record into its persisted form.
    pub fn to_entry(&self) -> StageEntry {
        StageEntry {
            timestamp: self.timestamp,
            data: self.payload.clone(),
        }
    }
}

/// Destination for per-stage checkpoints of one run.
///
/// Implementations serialize their own writes. A failed write is reported to
/// the caller, which decides whether it matters; the pipeline never aborts on
/// one.
#[async_trait]
pub trait CheckpointSink: Send + Sync {
    /// Identifier of the run this sink belongs to.
    fn run_id(&self) -> &str;

    /// Human-readable location of the log (a path for file-backed sinks).
    fn location(&self) -> String;

    /// Records `payload` under `stage`, replacing any earlier entry of the
    /// same name in the document. The history keeps both.
    async fn record(&self, stage: &str, payload: Value) -> Result<(), CheckpointError>;

    /// Every record made through this sink, in order, including overwritten
    /// ones. Records whose write failed are kept with `persisted` unset.
    async fn history(&self) -> Vec<StageRecord>;
}

/// Append-only record history with monotonic timestamps.
#[derive(Debug, Default)]
pub(crate) struct History {
    records: Vec<StageRecord>,
}

impl History {
    /// Stamps and appends a new record, returning a copy of it.
    pub(crate) fn push(&mut self, stage: &str, payload: Value) -> StageRecord {
        let now = Utc::now();
        let timestamp = match self.records.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };

        if self.records.iter().any(|r| r.stage == stage) {
            tracing::warn!(stage, "Stage recorded again; run log entry will be overwritten");
        }

        let record = StageRecord {
            stage: stage.to_string(),
            timestamp,
            payload,
            persisted: false,
        };
        self.records.push(record.clone());
        record
    }

    /// Marks the most recent record as written to storage.
    pub(crate) fn mark_persisted(&mut self) {
        if let Some(last) = self.records.last_mut() {
            last.persisted = true;
        }
    }

    pub(crate) fn records(&self) -> Vec<StageRecord> {
        self.records.clone()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    document: RunLogDocument,
    history: History,
}

/// Run log kept in memory only.
#[derive(Debug)]
pub struct MemoryRunLog {
    run_id: String,
    state: Mutex<MemoryState>,
}

impl MemoryRunLog {
    /// Creates an empty in-memory log for `run_id`.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Returns a copy of the current document.
    pub async fn snapshot(&self) -> RunLogDocument {
        self.state.lock().await.document.clone()
    }
}

#[async_trait]
impl CheckpointSink for MemoryRunLog {
    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn location(&self) -> String {
        format!("memory://{}", self.run_id)
    }

    async fn record(&self, stage: &str, payload: Value) -> Result<(), CheckpointError> {
        let mut state = self.state.lock().await;
        let record = state.history.push(stage, payload);
        state.document.insert(record.stage.clone(), record.to_entry());
        state.history.mark_persisted();
        Ok(())
    }

    async fn history(&self) -> Vec<StageRecord> {
        self.state.lock().await.history.records()
    }
}
