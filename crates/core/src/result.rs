//! Per-operation outcomes and the append-only result record of a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{BatchId, JobId};
use crate::job::JobStatus;

/// Longest error message kept on a result.
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome {
    Success,
    Error,
}

/// Outcome of one operation after its retry sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Batch-wide index of the operation.
    pub operation_index: usize,
    pub target_id: String,
    pub status: OperationOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error category (`rate_limited`, `server_error`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
}

impl OperationResult {
    pub fn success(
        operation_index: usize,
        target_id: impl Into<String>,
        attempts: u32,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            operation_index,
            target_id: target_id.into(),
            status: OperationOutcome::Success,
            error: None,
            error_code: None,
            attempts,
            processing_time_ms: Some(processing_time_ms),
        }
    }

    pub fn failure(
        operation_index: usize,
        target_id: impl Into<String>,
        error_code: impl Into<String>,
        error: &str,
        attempts: u32,
        processing_time_ms: Option<u64>,
    ) -> Self {
        Self {
            operation_index,
            target_id: target_id.into(),
            status: OperationOutcome::Error,
            error: Some(truncate_message(error, MAX_ERROR_MESSAGE_LEN)),
            error_code: Some(error_code.into()),
            attempts,
            processing_time_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OperationOutcome::Success
    }
}

/// Result record for one job. Outlives the job record itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResults {
    pub job_id: JobId,
    pub batch_id: BatchId,
    pub total_operations: usize,
    /// Status of the job as of the last write.
    pub job_status: JobStatus,
    pub results: Vec<OperationResult>,
    pub updated_at: DateTime<Utc>,
}

impl JobResults {
    pub fn new(job_id: JobId, batch_id: BatchId, total_operations: usize, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            batch_id,
            total_operations,
            job_status: JobStatus::Pending,
            results: Vec::new(),
            updated_at: now,
        }
    }

    /// Append a slice's results, replacing entries for operations that were
    /// already recorded (a re-attempt after an interrupted checkpoint).
    pub fn append(&mut self, results: Vec<OperationResult>, status: JobStatus, now: DateTime<Utc>) {
        for result in results {
            match self
                .results
                .iter_mut()
                .find(|r| r.operation_index == result.operation_index)
            {
                Some(existing) => *existing = result,
                None => self.results.push(result),
            }
        }
        self.results.sort_by_key(|r| r.operation_index);
        self.job_status = status;
        self.updated_at = now;
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn error_count(&self) -> usize {
        self.results.len() - self.success_count()
    }
}

/// Truncate to at most `max` characters, on a char boundary.
pub fn truncate_message(msg: &str, max: usize) -> String {
    match msg.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &msg[..idx]),
        None => msg.to_string(),
    }
}
