//! Job: a bounded, resumable slice of a batch's operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{BatchId, JobId};
use crate::operation::Operation;
use crate::options::BatchOptions;

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Persisted, never picked up by a drain
    Pending,
    /// A drain is currently dispatching a slice
    Processing,
    /// Every operation has been attempted
    Completed,
    /// Checkpointed with a non-empty remainder
    Partial,
    /// Job-level fatal error (store, validation)
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a drain run should pick this job up.
    ///
    /// `Processing` is included: with a single active worker, a job left in
    /// that state belongs to an invocation that was terminated mid-slice.
    pub fn is_drainable(&self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Processing | JobStatus::Partial
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
        }
    }
}

/// A persisted job record.
///
/// `operations` only ever holds the unprocessed remainder; the attempted
/// prefix is dropped at each checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub batch_id: BatchId,
    /// Position of this job within its batch (0-based).
    pub sequence: u32,
    /// Batch-wide index of this job's first original operation.
    pub offset: usize,
    pub operations: Vec<Operation>,
    /// Operation count at creation.
    pub total_operations: usize,
    pub status: JobStatus,
    pub processed_count: usize,
    pub options: BatchOptions,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Job {
    pub fn new(
        batch_id: BatchId,
        sequence: u32,
        offset: usize,
        operations: Vec<Operation>,
        options: BatchOptions,
        created_at: DateTime<Utc>,
    ) -> Self {
        let total_operations = operations.len();
        Self {
            id: JobId::new(),
            batch_id,
            sequence,
            offset,
            operations,
            total_operations,
            status: JobStatus::Pending,
            processed_count: 0,
            options,
            created_at,
            started_at: None,
            finished_at: None,
            last_error: None,
        }
    }

    pub fn remaining(&self) -> usize {
        self.operations.len()
    }

    /// Batch-wide index of the next unprocessed operation.
    pub fn next_operation_index(&self) -> usize {
        self.offset + self.processed_count
    }

    /// The first `limit` unprocessed operations.
    pub fn next_slice(&self, limit: usize) -> &[Operation] {
        let end = limit.min(self.operations.len());
        &self.operations[..end]
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_operations == 0 {
            return 100.0;
        }
        self.processed_count as f64 * 100.0 / self.total_operations as f64
    }

    /// Check the record-level invariants after loading from the store.
    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.processed_count > self.total_operations {
            return Err(DomainError::invariant(format!(
                "job {} processed {} of {} operations",
                self.id, self.processed_count, self.total_operations
            )));
        }
        if self.processed_count + self.operations.len() != self.total_operations {
            return Err(DomainError::invariant(format!(
                "job {} holds {} remaining operations, expected {}",
                self.id,
                self.operations.len(),
                self.total_operations - self.processed_count
            )));
        }
        Ok(())
    }

    /// Mark job as being dispatched by a drain run.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.started_at.get_or_insert(now);
    }

    /// Drop the first `attempted` operations and advance the checkpoint.
    ///
    /// Returns the resulting status: `Completed` when nothing remains,
    /// `Partial` otherwise.
    pub fn checkpoint(&mut self, attempted: usize, now: DateTime<Utc>) -> DomainResult<JobStatus> {
        if attempted > self.operations.len() {
            return Err(DomainError::invariant(format!(
                "job {} cannot checkpoint {} operations with {} remaining",
                self.id,
                attempted,
                self.operations.len()
            )));
        }

        self.operations.drain(..attempted);
        self.processed_count += attempted;

        if self.operations.is_empty() {
            self.status = JobStatus::Completed;
            self.finished_at = Some(now);
        } else {
            self.status = JobStatus::Partial;
        }
        Ok(self.status)
    }

    /// Mark job as failed at the job level.
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.last_error = Some(error.into());
        self.finished_at = Some(now);
    }
}
