//! Row worker: the full lifecycle of one row.
//!
//! build request → call provider (with retry) → record outcome → checkpoint.
//! Every failure ends in a `RowResult` with `success == false`; `process`
//! itself never fails.

use crate::checkpoint::CheckpointStore;
use crate::client::RetryingCaller;
use crate::models::{Row, RowResult, error_chain};
use crate::prompt::RequestBuilder;
use std::sync::Arc;
use tracing::{debug, error};

/// Processes rows for one job. Cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct RowWorker {
    builder: Arc<dyn RequestBuilder>,
    caller: Arc<RetryingCaller>,
    store: Arc<CheckpointStore>,
}

impl RowWorker {
    pub fn new(
        builder: Arc<dyn RequestBuilder>,
        caller: Arc<RetryingCaller>,
        store: Arc<CheckpointStore>,
    ) -> Self {
        Self {
            builder,
            caller,
            store,
        }
    }

    /// Label one row and checkpoint the outcome.
    pub async fn process(&self, row: Row) -> RowResult {
        let mut result = RowResult::pending(row.id);

        match self.builder.build(&row.fields) {
            Ok(request) => {
                result.api_kwargs = request.to_kwargs();
                match self.caller.call(row.id, &request).await {
                    Ok(response) => {
                        result.response_raw = response.raw;
                        result.response_content = response.content;
                    }
                    Err(e) => {
                        error!(row_id = row.id, error = %e, "API call failed");
                        result.fail(error_chain(&e));
                    }
                }
            }
            Err(e) => {
                error!(row_id = row.id, error = %e, "Failed to build request");
                result.fail(error_chain(&e));
            }
        }

        // A save failure replaces any API error: the row is no longer durable.
        if let Err(e) = self.store.write(&result) {
            error!(row_id = row.id, error = %e, "Checkpoint save failed");
            result.fail(error_chain(&e));
        }

        debug!(row_id = row.id, success = result.success, "Row finished");
        result
    }
}
