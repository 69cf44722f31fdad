//! File-backed run log.
//!
//! Each run owns one JSON document under the results directory, named after
//! the run's start time. Every checkpoint re-reads the document, merges the
//! new stage into it and writes the whole document back.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::store::{CheckpointSink, History, RunLogDocument, StageRecord};
use crate::error::CheckpointError;

/// Run log persisted as a pretty-printed JSON object.
#[derive(Debug)]
pub struct JsonRunLog {
    run_id: String,
    path: PathBuf,
    history: Mutex<History>,
}

impl JsonRunLog {
    /// Creates a log for a run starting now, under `results_dir`.
    ///
    /// The run id is `analysis_<YYYYMMDD_HHMMSS>`. The log file is reserved
    /// with an exclusive create, so a run starting in the same second as
    /// another gets a numeric suffix instead of sharing its file. If the
    /// results directory is unusable the id is still assigned and the failure
    /// surfaces on the first checkpoint.
    pub async fn create(results_dir: impl Into<PathBuf>) -> Self {
        let results_dir = results_dir.into();
        let base = format!("analysis_{}", Local::now().format("%Y%m%d_%H%M%S"));

        let mut run_id = base.clone();
        let mut suffix = 1;
        loop {
            let log = Self::with_run_id(&results_dir, run_id.clone());
            match log.reserve().await {
                Ok(true) => return log,
                Ok(false) => {
                    run_id = format!("{}_{}", base, suffix);
                    suffix += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        run_id = %run_id,
                        error = %e,
                        "Could not reserve run log; checkpoints may fail"
                    );
                    return log;
                }
            }
        }
    }

    /// Creates a log with an explicit run id.
    pub fn with_run_id(results_dir: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        let path = results_dir.into().join(format!("{}.json", run_id));
        Self {
            run_id,
            path,
            history: Mutex::new(History::default()),
        }
    }

    /// Path of the JSON document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_directory(&self) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|source| {
                    CheckpointError::DirectoryCreationFailed {
                        path: parent.display().to_string(),
                        source,
                    }
                })?;
            }
        }
        Ok(())
    }

    /// Creates the log file holding an empty document. Returns `Ok(false)`
    /// if the file already belongs to another run.
    async fn reserve(&self) -> Result<bool, CheckpointError> {
        self.ensure_directory().await?;

        let io_err = |source| CheckpointError::Io {
            path: self.path.display().to_string(),
            source,
        };
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(io_err(e)),
        };
        file.write_all(b"{}").await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        Ok(true)
    }

    async fn merge_and_write(&self, record: &StageRecord) -> Result<(), CheckpointError> {
        self.ensure_directory().await?;

        let mut document = if fs::try_exists(&self.path).await.unwrap_or(false) {
            load_run_log(&self.path).await?
        } else {
            RunLogDocument::new()
        };
        document.insert(record.stage.clone(), record.to_entry());

        let json = serde_json::to_string_pretty(&document)?;
        let tmp = self.path.with_extension("json.tmp");
        let io_err = |source| CheckpointError::Io {
            path: self.path.display().to_string(),
            source,
        };

        let mut file = fs::File::create(&tmp).await.map_err(io_err)?;
        file.write_all(json.as_bytes()).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);
        fs::rename(&tmp, &self.path).await.map_err(io_err)?;

        Ok(())
    }
}

#[async_trait]
impl CheckpointSink for JsonRunLog {
    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    async fn record(&self, stage: &str, payload: Value) -> Result<(), CheckpointError> {
        // Held across the write so checkpoints of one run never interleave.
        let mut history = self.history.lock().await;
        let record = history.push(stage, payload);
        self.merge_and_write(&record).await?;
        history.mark_persisted();
        Ok(())
    }

    async fn history(&self) -> Vec<StageRecord> {
        self.history.lock().await.records()
    }
}

/// Reads a persisted run log.
///
/// # Errors
///
/// Returns `CheckpointError::Io` if the file cannot be read and
/// `CheckpointError::Corrupt` if it is not a run log document.
pub async fn load_run_log(path: impl AsRef<Path>) -> Result<RunLogDocument, CheckpointError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .await
        .map_err(|source| CheckpointError::Io {
            path: path.display().to_string(),
            source,
        })?;

    serde_json::from_str(&contents).map_err(|source| CheckpointError::Corrupt {
        path: path.display().to_string(),
        source,
    })
}
