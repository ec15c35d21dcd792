//! Row and result types for aeon.
//!
//! These types carry one unit of work from the input table to its
//! checkpoint file and into the output table.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Field name to value mapping for one input row.
pub type RowFields = BTreeMap<String, String>;

/// One unit of work.
///
/// `id` is the row's position in the input table and the only ordering key
/// for results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: usize,
    pub fields: RowFields,
}

impl Row {
    pub fn new(id: usize, fields: RowFields) -> Self {
        Self { id, fields }
    }
}

/// Terminal outcome of processing one row.
///
/// Created once by the row worker after the API call resolves and persisted
/// as `{id}.json` in the job's `batches/` directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowResult {
    /// Position of the row in the input table
    pub id: usize,

    /// Whether the call succeeded and the result was checkpointed
    pub success: bool,

    /// Error chain, empty on success
    #[serde(default)]
    pub error: String,

    /// Full provider response body
    #[serde(default = "empty_object")]
    pub response_raw: Value,

    /// Parsed structured output
    #[serde(default = "empty_object")]
    pub response_content: Value,

    /// Request payload sent to the provider, schema stripped
    #[serde(default = "empty_object")]
    pub api_kwargs: Value,
}

pub(crate) fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl RowResult {
    /// A result that has not yet reached the provider.
    pub fn pending(id: usize) -> Self {
        Self {
            id,
            success: true,
            error: String::new(),
            response_raw: empty_object(),
            response_content: empty_object(),
            api_kwargs: empty_object(),
        }
    }

    /// Mark this result failed, replacing any earlier error.
    pub fn fail(&mut self, error: String) {
        self.success = false;
        self.error = error;
    }

    /// Content of the final request message, the one rendered from the row.
    pub fn last_message(&self) -> String {
        self.api_kwargs
            .get("messages")
            .and_then(Value::as_array)
            .and_then(|messages| messages.last())
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

/// Summary returned by a labeling run.
#[derive(Debug, Clone)]
pub struct JobResult {
    /// False when the run was interrupted
    pub completed: bool,

    /// Wall-clock time spent dispatching and collecting rows
    pub duration_seconds: f64,

    /// Rows whose result has `success == false`
    pub n_errors: usize,

    /// Rows never started because the run was cancelled
    pub n_skipped: usize,

    /// Job directory
    pub job_dir: PathBuf,

    /// Path of the output artifact
    pub output_path: PathBuf,

    /// The reassembled output table
    pub table: crate::pipeline::OutputTable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_message_reads_final_content() {
        let mut result = RowResult::pending(0);
        result.api_kwargs = json!({
            "model": "gpt-4.1-nano",
            "messages": [
                {"role": "developer", "content": "static"},
                {"role": "user", "content": "joke: why"}
            ]
        });
        assert_eq!(result.last_message(), "joke: why");
    }

    #[test]
    fn test_last_message_empty_without_request() {
        assert_eq!(RowResult::pending(4).last_message(), "");
    }

    #[test]
    fn test_checkpoint_defaults_fill_missing_fields() {
        let parsed: RowResult =
            serde_json::from_str(r#"{"id": 2, "success": false, "error": "boom"}"#).unwrap();
        assert_eq!(parsed.id, 2);
        assert!(!parsed.success);
        assert_eq!(parsed.response_raw, json!({}));
        assert_eq!(parsed.api_kwargs, json!({}));
    }

    #[test]
    fn test_fail_overwrites_error() {
        let mut result = RowResult::pending(1);
        result.fail("api failed".into());
        result.fail("save failed".into());
        assert!(!result.success);
        assert_eq!(result.error, "save failed");
    }
}
