//! aeon - Batch labeling of tabular rows with a hosted LLM.
//!
//! ## Architecture
//!
//! A labeling job renders one request per input row from a named prompt,
//! sends it through a bounded worker pool, and reassembles the results into
//! a table sorted by row id:
//! - **Prompt layer**: Registry of prompt files, `$var` templates, model option resolution
//! - **Client layer**: Provider trait, OpenAI-compatible HTTP client, fixed-chain retry
//! - **Pool**: Per-row workers that checkpoint every outcome before reporting it
//! - **Pipeline**: Job directory, cancellation, output table, recovery from checkpoints
//!
//! ## Failure model
//!
//! Pre-flight problems (missing template variables, bad options, an existing
//! job directory) fail the whole job before any API call. Everything after
//! that is recorded per row: a row either carries its response or an error
//! string, and the job still produces an output table.

pub mod checkpoint;
pub mod client;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod prompt;

// Re-exports for convenience
pub use checkpoint::CheckpointStore;
pub use client::{LlmClient, Provider, RetryPolicy, create_provider};
pub use models::{AeonError, Config, JobResult, Result, RowFields, RowResult};
pub use pipeline::{LabelSettings, Labeler, OutputTable, recover};
pub use prompt::{PromptRegistry, PromptRequestBuilder, RequestBuilder};
