//! Checkpoint module for durable, per-row results.
//!
//! Provides `CheckpointStore`: one immutable JSON file per finished row,
//! readable back for recovery of interrupted or killed jobs.

mod store;

pub use store::*;
