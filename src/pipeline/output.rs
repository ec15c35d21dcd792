//! Output table assembly and recovery.

use crate::checkpoint::CheckpointStore;
use crate::models::{AeonError, Result, RowResult};
use crate::pipeline::OUTPUT_FILE;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One row of the output table: the row result plus derived columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRow {
    #[serde(flatten)]
    pub result: RowResult,

    /// Content of the rendered (final) request message
    #[serde(default)]
    pub last_message: String,
}

impl From<RowResult> for OutputRow {
    fn from(result: RowResult) -> Self {
        let last_message = result.last_message();
        Self {
            result,
            last_message,
        }
    }
}

/// Row results sorted by row id, regardless of completion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputTable {
    rows: Vec<OutputRow>,
}

impl OutputTable {
    pub fn from_results(results: Vec<RowResult>) -> Self {
        let mut rows: Vec<OutputRow> = results.into_iter().map(OutputRow::from).collect();
        rows.sort_by_key(|r| r.result.id);
        Self { rows }
    }

    pub fn rows(&self) -> &[OutputRow] {
        &self.rows
    }

    pub fn ids(&self) -> Vec<usize> {
        self.rows.iter().map(|r| r.result.id).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn n_errors(&self) -> usize {
        self.rows.iter().filter(|r| !r.result.success).count()
    }

    pub fn into_results(self) -> Vec<RowResult> {
        self.rows.into_iter().map(|r| r.result).collect()
    }

    /// Write the table as JSON Lines, one row per line.
    pub fn write_jsonl(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| AeonError::io("creating output file", e))?;
        let mut writer = BufWriter::new(file);

        for row in &self.rows {
            let json = serde_json::to_string(row)
                .map_err(|e| AeonError::serialization("serializing output row", e))?;
            writeln!(writer, "{json}").map_err(|e| AeonError::io("writing output", e))?;
        }

        writer
            .flush()
            .map_err(|e| AeonError::io("flushing output", e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| AeonError::io("syncing output", e))
    }

    pub fn read_jsonl(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| AeonError::io("opening output file", e))?;
        let mut rows = Vec::new();

        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| AeonError::io("reading output file", e))?;
            if line.trim().is_empty() {
                continue;
            }
            let row: OutputRow = serde_json::from_str(&line)
                .map_err(|e| AeonError::ParseError(format!("Line {}: {e}", line_num + 1)))?;
            rows.push(row);
        }

        Ok(Self::from_results(
            rows.into_iter().map(|r| r.result).collect(),
        ))
    }
}

/// Table rebuilt from a job's checkpoints.
#[derive(Debug)]
pub struct RecoveredJob {
    pub table: OutputTable,
    pub n_errors: usize,
    pub output_path: PathBuf,
    pub unreadable: Vec<(PathBuf, String)>,
}

/// Rebuild the output table of an interrupted or killed job from its
/// checkpoints and write it to the job's output file.
pub fn recover(job_dir: &Path) -> Result<RecoveredJob> {
    let store = CheckpointStore::open(job_dir);
    if !store.exists() {
        return Err(AeonError::InvalidInput(format!(
            "No checkpoint directory at {}",
            store.dir().display()
        )));
    }

    let loaded = store.load_all()?;
    if !loaded.unreadable.is_empty() {
        warn!(count = loaded.unreadable.len(), "Some checkpoints could not be read");
    }

    let table = OutputTable::from_results(loaded.results);
    let output_path = job_dir.join(OUTPUT_FILE);
    table.write_jsonl(&output_path)?;

    let n_errors = table.n_errors();
    info!(
        rows = table.len(),
        errors = n_errors,
        output = %output_path.display(),
        "Recovered output from checkpoints"
    );

    Ok(RecoveredJob {
        table,
        n_errors,
        output_path,
        unreadable: loaded.unreadable,
    })
}
