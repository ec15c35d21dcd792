//! Job identity, directory layout and lifecycle state.
//!
//! Layout: `{parent_dir}/{prompt_name}/{timestamp}-{hash}/` holding
//! `response_format.json`, `batches/` and `output.jsonl`.

use crate::models::{AeonError, Result, RowFields};
use chrono::Local;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;

pub const OUTPUT_FILE: &str = "output.jsonl";
pub const SCHEMA_FILE: &str = "response_format.json";

/// Lifecycle of a labeling job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Initializing,
    Running,
    Completed,
    Cancelled,
    Finalizing,
    Done,
}

impl JobState {
    fn can_move_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Initializing, Running)
                | (Running, Completed)
                | (Running, Cancelled)
                | (Completed, Finalizing)
                | (Cancelled, Finalizing)
                | (Finalizing, Done)
        )
    }
}

/// One labeling run.
#[derive(Debug)]
pub struct Job {
    pub prompt_name: String,
    pub n_rows: usize,
    pub dir: PathBuf,
    pub max_workers: usize,
    pub started_at: Instant,
    pub completed: bool,
    state: JobState,
}

impl Job {
    pub fn new(prompt_name: &str, n_rows: usize, dir: PathBuf, max_workers: usize) -> Self {
        Self {
            prompt_name: prompt_name.to_string(),
            n_rows,
            dir,
            max_workers,
            started_at: Instant::now(),
            completed: true,
            state: JobState::Initializing,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_move_to(next) {
            return Err(AeonError::Internal(format!(
                "invalid job transition {:?} -> {next:?}",
                self.state
            )));
        }
        debug!(prompt = %self.prompt_name, from = ?self.state, to = ?next, "Job state");
        if next == JobState::Cancelled {
            self.completed = false;
        }
        self.state = next;
        Ok(())
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir.join(OUTPUT_FILE)
    }
}

/// Current local time as `YYYY.MM.DD_HH.MM.SS`.
pub fn timestamp() -> String {
    Local::now().format("%Y.%m.%d_%H.%M.%S").to_string()
}

/// Short SHA-256 over everything that determines a run's output.
pub fn content_hash(prompt_name: &str, request_shape: &Value, rows: &[RowFields]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(request_shape.to_string().as_bytes());
    for row in rows {
        hasher.update([0u8]);
        hasher.update(serde_json::to_string(row).unwrap_or_default().as_bytes());
    }
    let digest = hasher.finalize();
    format!("{digest:x}")[..12].to_string()
}

/// Path of a new job directory; not created.
pub fn job_dir(parent_dir: &Path, prompt_name: &str, hash: &str) -> PathBuf {
    parent_dir
        .join(prompt_name)
        .join(format!("{}-{hash}", timestamp()))
}

/// Create the job directory, refusing to reuse an existing one.
pub fn create_job_dir(dir: &Path) -> Result<()> {
    if let Some(parent) = dir.parent() {
        fs::create_dir_all(parent).map_err(|e| AeonError::io("creating prompt dir", e))?;
    }
    match fs::create_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(AeonError::OutputDirExists(dir.to_owned()))
        }
        Err(e) => Err(AeonError::io("creating job dir", e)),
    }
}

/// Write the output schema description next to the results.
pub fn write_schema(dir: &Path, schema: &Value) -> Result<()> {
    let content = serde_json::to_string_pretty(schema)
        .map_err(|e| AeonError::serialization("serializing response schema", e))?;
    fs::write(dir.join(SCHEMA_FILE), content).map_err(|e| AeonError::io("writing response schema", e))
}
