//! Labeling job coordinator.
//!
//! Pipeline flow:
//! Rows → bounded worker pool → RowResults (+ checkpoints) → sorted output table
//!
//! ```ignore
//! let labeler = Labeler::new(builder, provider, RetryPolicy::default(), LabelSettings::default());
//! let rows = Labeler::load_rows(Path::new("jokes.jsonl"))?;
//! let result = labeler.label(rows, CancellationToken::new()).await?;
//! println!("{} errors, output at {}", result.n_errors, result.output_path.display());
//! ```

use crate::checkpoint::CheckpointStore;
use crate::client::{Provider, RetryPolicy, RetryingCaller};
use crate::models::{AeonError, Config, JobResult, Result, Row, RowFields, RowResult};
use crate::pipeline::{Job, JobState, OutputTable, content_hash, create_job_dir, job_dir, write_schema};
use crate::pool::RowWorker;
use crate::prompt::RequestBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Run-level settings for a labeler.
#[derive(Debug, Clone)]
pub struct LabelSettings {
    /// Parent of all job directories
    pub parent_dir: PathBuf,
    /// Rows processed concurrently
    pub max_workers: usize,
    /// Remove `batches/` after an uninterrupted run
    pub cleanup: bool,
    /// Draw a progress bar on stderr
    pub show_progress: bool,
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self {
            parent_dir: PathBuf::from("data/labels"),
            max_workers: 15,
            cleanup: true,
            show_progress: false,
        }
    }
}

impl From<&Config> for LabelSettings {
    fn from(config: &Config) -> Self {
        Self {
            parent_dir: config.labeling.parent_dir.clone(),
            max_workers: config.labeling.max_workers,
            cleanup: config.labeling.cleanup,
            show_progress: true,
        }
    }
}

/// Coordinates one labeling run per call to [`Labeler::label`].
pub struct Labeler {
    builder: Arc<dyn RequestBuilder>,
    provider: Arc<dyn Provider>,
    retry: RetryPolicy,
    settings: LabelSettings,
}

impl Labeler {
    pub fn new(
        builder: Arc<dyn RequestBuilder>,
        provider: Arc<dyn Provider>,
        retry: RetryPolicy,
        settings: LabelSettings,
    ) -> Self {
        Self {
            builder,
            provider,
            retry,
            settings,
        }
    }

    pub fn settings(&self) -> &LabelSettings {
        &self.settings
    }

    /// Load input rows from a JSONL file.
    ///
    /// Each line is an object; string values are used verbatim, anything
    /// else is rendered as its JSON text. `null` fields are treated as absent.
    pub fn load_rows(path: &Path) -> Result<Vec<RowFields>> {
        let file = File::open(path).map_err(|e| AeonError::io("opening input file", e))?;
        let reader = BufReader::new(file);
        let mut rows = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| AeonError::io("reading input file", e))?;
            if line.trim().is_empty() {
                continue;
            }
            let object: serde_json::Map<String, Value> = serde_json::from_str(&line)
                .map_err(|e| AeonError::ParseError(format!("Line {}: {e}", line_num + 1)))?;
            rows.push(
                object
                    .into_iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| {
                        let text = match v {
                            Value::String(s) => s,
                            other => other.to_string(),
                        };
                        (k, text)
                    })
                    .collect(),
            );
        }

        info!(count = rows.len(), "Loaded input rows");
        Ok(rows)
    }

    /// Template variables absent from every row of the table.
    fn missing_variables(&self, rows: &[RowFields]) -> Vec<String> {
        let columns: BTreeSet<&str> = rows.iter().flat_map(|r| r.keys().map(String::as_str)).collect();
        self.builder
            .variables()
            .iter()
            .filter(|v| !columns.contains(v.as_str()))
            .cloned()
            .collect()
    }

    /// Label every row, one API call per row.
    ///
    /// Returns an error only for pre-flight failures (missing template
    /// variables, an existing job directory, invalid settings). Row failures
    /// are counted in `n_errors`. Cancelling `cancel` skips rows that have not
    /// started; rows already in flight finish, checkpoint, and are included.
    pub async fn label(&self, rows: Vec<RowFields>, cancel: CancellationToken) -> Result<JobResult> {
        let prompt_name = self.builder.prompt_name().to_string();

        // ── Initializing ──────────────────────────────────────────────────
        if self.settings.max_workers == 0 {
            return Err(AeonError::InvalidInput(
                "max_workers must be at least 1".to_string(),
            ));
        }
        let missing = self.missing_variables(&rows);
        if !missing.is_empty() {
            return Err(AeonError::MissingVariables {
                prompt: prompt_name,
                missing,
            });
        }

        let schema = self
            .builder
            .response_format()
            .map(|f| f.schema.clone())
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        let hash = content_hash(&prompt_name, &self.builder.request_shape(), &rows);
        let dir = job_dir(&self.settings.parent_dir, &prompt_name, &hash);
        create_job_dir(&dir)?;
        write_schema(&dir, &schema)?;
        let store = Arc::new(CheckpointStore::create(&dir)?);

        let mut job = Job::new(&prompt_name, rows.len(), dir, self.settings.max_workers);
        info!(dir = %job.dir.display(), workers = job.max_workers, "Labels will be saved in job directory");

        // ── Running ───────────────────────────────────────────────────────
        job.transition(JobState::Running)?;
        let worker = RowWorker::new(
            Arc::clone(&self.builder),
            Arc::new(RetryingCaller::new(
                Arc::clone(&self.provider),
                self.retry.clone(),
            )),
            Arc::clone(&store),
        );
        let variables = self.builder.variables().to_vec();
        let semaphore = Arc::new(Semaphore::new(job.max_workers));
        let mut tasks = JoinSet::new();

        for (id, fields) in rows.into_iter().enumerate() {
            let fields: RowFields = fields
                .into_iter()
                .filter(|(k, _)| variables.contains(k))
                .collect();
            let worker = worker.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                // A closed semaphore or a cancelled token means this row never starts.
                let _permit = semaphore.acquire_owned().await.ok()?;
                if cancel.is_cancelled() {
                    return None;
                }
                Some(worker.process(Row::new(id, fields)).await)
            });
        }

        let progress = self.progress_bar(job.n_rows);
        let mut results: Vec<RowResult> = Vec::with_capacity(job.n_rows);
        let mut skipped = 0usize;
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    semaphore.close();
                    info!("Canceling labeling job. Previously launched API calls will still run.");
                }
                next = tasks.join_next() => match next {
                    None => break,
                    Some(Ok(Some(result))) => {
                        results.push(result);
                        progress.inc(1);
                    }
                    Some(Ok(None)) => skipped += 1,
                    Some(Err(e)) => error!(error = %e, "Row task aborted"),
                },
            }
        }
        job.transition(if cancelled {
            JobState::Cancelled
        } else {
            JobState::Completed
        })?;
        progress.finish_and_clear();
        let duration_seconds = job.started_at.elapsed().as_secs_f64();

        // ── Finalizing ────────────────────────────────────────────────────
        job.transition(JobState::Finalizing)?;
        let table = OutputTable::from_results(results);
        let n_errors = table.n_errors();
        let output_path = job.output_path();
        table.write_jsonl(&output_path)?;

        if job.completed && self.settings.cleanup {
            info!("Removing intermediate results dir since job completed without interruption.");
            if let Err(e) = Arc::unwrap_or_clone(store).remove() {
                warn!(error = %e, "Failed to remove checkpoint directory");
            }
        }

        job.transition(JobState::Done)?;
        info!(
            completed = job.completed,
            rows = table.len(),
            skipped,
            errors = n_errors,
            duration_secs = duration_seconds,
            output = %output_path.display(),
            "Labeling job finished"
        );

        Ok(JobResult {
            completed: job.completed,
            duration_seconds,
            n_errors,
            n_skipped: skipped,
            job_dir: job.dir,
            output_path,
            table,
        })
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.settings.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("Labeling rows [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%)")
        {
            pb.set_style(style.progress_chars("##-"));
        }
        pb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiRequest, Message, ProviderResponse};
    use crate::models::ProviderError;
    use crate::prompt::{PromptDefinition, PromptRequestBuilder};
    use async_trait::async_trait;
    use serde_json::{Map, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Answers with the row's text after a delay that shrinks with the row
    /// id, so later rows tend to finish first.
    struct ReversingProvider {
        started: AtomicUsize,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    #[async_trait]
    impl Provider for ReversingProvider {
        fn name(&self) -> &str {
            "reversing"
        }

        async fn call(&self, request: &ApiRequest) -> std::result::Result<ProviderResponse, ProviderError> {
            let started = self.started.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((limit, token)) = &self.cancel_after {
                if started == *limit {
                    token.cancel();
                }
            }
            let text = request.last_message().map(|m| m.content.clone()).unwrap_or_default();
            let n: u64 = text.trim_start_matches("text: row ").parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(50u64.saturating_sub(n * 10))).await;
            Ok(ProviderResponse {
                raw: json!({"choices": [{"message": {"content": text}}]}),
                content: json!({"label": text}),
            })
        }
    }

    fn builder() -> Arc<dyn RequestBuilder> {
        let definition = PromptDefinition {
            messages: vec![Message::new("developer", "Label."), Message::user("text: $text")],
            options: Map::new(),
            response_format: None,
        };
        Arc::new(PromptRequestBuilder::new("label_rows", &definition, &Map::new()).unwrap())
    }

    fn rows(n: usize) -> Vec<RowFields> {
        (0..n)
            .map(|i| {
                [
                    ("text".to_string(), format!("row {i}")),
                    ("unused".to_string(), "x".to_string()),
                ]
                .into()
            })
            .collect()
    }

    fn labeler(parent: &Path, provider: Arc<dyn Provider>, max_workers: usize) -> Labeler {
        Labeler::new(
            builder(),
            provider,
            RetryPolicy::default(),
            LabelSettings {
                parent_dir: parent.to_path_buf(),
                max_workers,
                cleanup: true,
                show_progress: false,
            },
        )
    }

    #[tokio::test]
    async fn test_results_sorted_despite_completion_order() {
        let temp_dir = TempDir::new().unwrap();
        let provider = Arc::new(ReversingProvider {
            started: AtomicUsize::new(0),
            cancel_after: None,
        });
        let labeler = labeler(temp_dir.path(), provider, 2);

        let result = labeler.label(rows(5), CancellationToken::new()).await.unwrap();
        assert!(result.completed);
        assert_eq!(result.n_errors, 0);
        assert_eq!(result.n_skipped, 0);
        assert_eq!(result.table.ids(), vec![0, 1, 2, 3, 4]);
        for row in result.table.rows() {
            let expected = format!("text: row {}", row.result.id);
            assert_eq!(row.result.response_content, json!({"label": expected}));
            assert_eq!(row.last_message, expected);
            // Only template variables reach the request
            assert!(!row.result.api_kwargs.to_string().contains("unused"));
        }
        assert!(result.output_path.exists());
        assert!(result.job_dir.join("response_format.json").exists());
        assert!(!result.job_dir.join("batches").exists());
    }

    #[tokio::test]
    async fn test_cancellation_keeps_in_flight_rows() {
        let temp_dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let provider = Arc::new(ReversingProvider {
            started: AtomicUsize::new(0),
            cancel_after: Some((2, cancel.clone())),
        });
        let labeler = labeler(temp_dir.path(), provider, 2);

        let result = labeler.label(rows(5), cancel).await.unwrap();
        assert!(!result.completed);
        assert!(result.table.len() >= 2 && result.table.len() <= 5);
        assert_eq!(result.table.len() + result.n_skipped, 5);

        // Every collected row was checkpointed and the checkpoints survive
        let store = CheckpointStore::open(&result.job_dir);
        assert!(store.exists());
        for id in result.table.ids() {
            assert!(store.path_for(id).exists());
        }
        let reread = OutputTable::read_jsonl(&result.output_path).unwrap();
        assert_eq!(reread, result.table);
    }

    #[tokio::test]
    async fn test_missing_variable_fails_before_any_work() {
        let temp_dir = TempDir::new().unwrap();
        let provider = Arc::new(ReversingProvider {
            started: AtomicUsize::new(0),
            cancel_after: None,
        });
        let labeler = labeler(temp_dir.path(), provider.clone(), 2);
        let rows: Vec<RowFields> = vec![[("body".to_string(), "no text column".to_string())].into()];

        let err = labeler.label(rows, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            AeonError::MissingVariables { ref missing, .. } if missing == &vec!["text".to_string()]
        ));
        assert_eq!(provider.started.load(Ordering::SeqCst), 0);
        assert!(!temp_dir.path().join("label_rows").exists());
    }

    #[tokio::test]
    async fn test_row_missing_field_is_row_failure() {
        let temp_dir = TempDir::new().unwrap();
        let provider = Arc::new(ReversingProvider {
            started: AtomicUsize::new(0),
            cancel_after: None,
        });
        let labeler = labeler(temp_dir.path(), provider.clone(), 3);
        let mut rows = rows(3);
        rows[1].remove("text");

        let result = labeler.label(rows, CancellationToken::new()).await.unwrap();
        assert!(result.completed);
        assert_eq!(result.n_errors, 1);
        assert!(!result.table.rows()[1].result.success);
        assert_eq!(result.table.rows()[1].result.response_raw, json!({}));
        assert_eq!(provider.started.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_load_rows_stringifies_values() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("rows.jsonl");
        std::fs::write(
            &path,
            "{\"text\": \"hi\", \"n\": 3, \"skip\": null}\n\n{\"text\": \"there\", \"tags\": [\"a\"]}\n",
        )
        .unwrap();

        let rows = Labeler::load_rows(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["text"], "hi");
        assert_eq!(rows[0]["n"], "3");
        assert!(!rows[0].contains_key("skip"));
        assert_eq!(rows[1]["tags"], "[\"a\"]");
    }
}
