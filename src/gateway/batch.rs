//! Batch runner — a sequence of operations with per-item results.
//!
//! Items run one at a time in input order. Under
//! [`BatchPolicy::ContinueOnError`] every item gets a record, success or a
//! structured error. Under [`BatchPolicy::FailFast`] the run stops at the
//! first failure and returns [`BatchAborted`] with the items completed so far.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::client::ZeebeClient;
use super::types::{CallOptions, Operation, OperationOutput};
use crate::error::{ClientError, ErrorKind, Result};

/// What a batch does after an item fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Stop at the first failure.
    #[default]
    FailFast,
    /// Record the failure and move on.
    ContinueOnError,
}

impl BatchPolicy {
    pub fn from_continue_flag(continue_on_error: bool) -> Self {
        if continue_on_error {
            Self::ContinueOnError
        } else {
            Self::FailFast
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Structured error record for a failed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&ClientError> for ErrorRecord {
    fn from(error: &ClientError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ItemOutcome {
    Succeeded { output: OperationOutput },
    Failed { error: ErrorRecord },
}

/// Result of one batch item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub index: usize,
    pub operation: String,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
    pub duration_ms: u64,
}

impl BatchItem {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Succeeded { .. })
    }
}

/// Results of a whole batch, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub policy: BatchPolicy,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    pub fn success_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.items.len() - self.success_count()
    }
}

/// A fail-fast batch stopped at item `index`.
#[derive(Debug, Clone, Error)]
#[error("batch aborted at item {index}: {error}")]
pub struct BatchAborted {
    pub index: usize,
    pub error: ClientError,
    pub completed: Vec<BatchItem>,
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Anything that can run one tagged operation.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, operation: Operation, options: CallOptions) -> Result<OperationOutput>;
}

#[async_trait]
impl OperationExecutor for ZeebeClient {
    async fn execute(&self, operation: Operation, options: CallOptions) -> Result<OperationOutput> {
        ZeebeClient::execute(self, operation, options).await
    }
}

/// Run `operations` in order under `policy`.
pub async fn run_batch<E>(
    executor: &E,
    operations: Vec<Operation>,
    policy: BatchPolicy,
    options: CallOptions,
) -> std::result::Result<BatchReport, BatchAborted>
where
    E: OperationExecutor + ?Sized,
{
    let started_at = Utc::now();
    let total = operations.len();
    let mut items = Vec::with_capacity(total);

    tracing::info!(total, policy = ?policy, "batch started");

    for (index, operation) in operations.into_iter().enumerate() {
        let name = operation.name();
        let item_start = Instant::now();
        let result = executor.execute(operation, options.clone()).await;
        let duration_ms = item_start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                tracing::debug!(index, operation = name, duration_ms, "batch item succeeded");
                items.push(BatchItem {
                    index,
                    operation: name.to_string(),
                    outcome: ItemOutcome::Succeeded { output },
                    duration_ms,
                });
            }
            Err(error) => {
                tracing::warn!(index, operation = name, error = %error, "batch item failed");
                let item = BatchItem {
                    index,
                    operation: name.to_string(),
                    outcome: ItemOutcome::Failed {
                        error: ErrorRecord::from(&error),
                    },
                    duration_ms,
                };
                match policy {
                    BatchPolicy::ContinueOnError => items.push(item),
                    BatchPolicy::FailFast => {
                        return Err(BatchAborted {
                            index,
                            error,
                            completed: items,
                        });
                    }
                }
            }
        }
    }

    let report = BatchReport {
        policy,
        started_at,
        finished_at: Utc::now(),
        items,
    };
    tracing::info!(
        total,
        succeeded = report.success_count(),
        failed = report.failure_count(),
        "batch finished"
    );
    Ok(report)
}

/// Parse a JSON array of tagged operations.
pub fn parse_operations(json: &str) -> Result<Vec<Operation>> {
    serde_json::from_str(json).map_err(|e| ClientError::InvalidPayload(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
