//! Per-run checkpointing of pipeline stages.
//!
//! A run log maps stage names (`initial_query`, `first_batch`,
//! `evaluation_first`, ...) to `{timestamp, data}` entries. Writes are
//! best-effort: a failed checkpoint is logged and reported as an event, but
//! never stops the run.

pub mod json;
pub mod store;

pub use json::{load_run_log, JsonRunLog};
pub use store::{CheckpointSink, MemoryRunLog, RunLogDocument, StageEntry, StageRecord};
