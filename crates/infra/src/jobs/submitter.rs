//! Batch submission: validate, chunk into jobs, persist.
//!
//! No downstream call happens here, so submission latency depends only on
//! the number of store writes.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use bulkpatch_core::{Batch, BatchId, BatchOptions, DomainError, Job, JobId, Operation};

use super::repository::JobRepository;
use crate::store::{KvStore, StoreError};

/// Largest accepted submission.
pub const MAX_OPERATIONS_PER_SUBMISSION: usize = 500;

#[derive(Debug, Error)]
pub enum SubmitError {
    /// Nothing was persisted.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<DomainError> for SubmitError {
    fn from(err: DomainError) -> Self {
        SubmitError::Validation(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    pub batch_id: BatchId,
    pub job_ids: Vec<JobId>,
    pub total_jobs: usize,
    pub total_operations: usize,
}

/// Split `operations` into consecutive chunks of at most `batch_size`.
pub fn chunk_operations(operations: Vec<Operation>, batch_size: usize) -> Vec<Vec<Operation>> {
    let batch_size = batch_size.max(1);
    let mut chunks = Vec::with_capacity(operations.len().div_ceil(batch_size));
    let mut iter = operations.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(batch_size).collect());
    }
    chunks
}

#[derive(Debug)]
pub struct BatchSubmitter<S> {
    repo: Arc<JobRepository<S>>,
    max_operations: usize,
}

impl<S: KvStore> BatchSubmitter<S> {
    pub fn new(repo: Arc<JobRepository<S>>) -> Self {
        Self {
            repo,
            max_operations: MAX_OPERATIONS_PER_SUBMISSION,
        }
    }

    fn validate(&self, operations: &[Operation], options: &BatchOptions) -> Result<(), SubmitError> {
        if operations.is_empty() {
            return Err(SubmitError::Validation(
                "at least one operation is required".to_string(),
            ));
        }
        if operations.len() > self.max_operations {
            return Err(SubmitError::Validation(format!(
                "at most {} operations per submission (got {})",
                self.max_operations,
                operations.len()
            )));
        }
        options.validate()?;
        for (i, op) in operations.iter().enumerate() {
            op.validate()
                .map_err(|e| SubmitError::Validation(format!("operations[{i}]: {e}")))?;
        }
        Ok(())
    }

    /// Persist a batch and its jobs. Either everything is validated and
    /// written, or (on validation failure) nothing is.
    pub async fn submit(
        &self,
        operations: Vec<Operation>,
        options: BatchOptions,
    ) -> Result<SubmitReceipt, SubmitError> {
        self.validate(&operations, &options)?;

        let now = Utc::now();
        let batch_id = BatchId::new();
        let total_operations = operations.len();

        let mut offset = 0;
        let jobs: Vec<Job> = chunk_operations(operations, options.batch_size)
            .into_iter()
            .enumerate()
            .map(|(sequence, chunk)| {
                let len = chunk.len();
                let job = Job::new(batch_id, sequence as u32, offset, chunk, options, now);
                offset += len;
                job
            })
            .collect();
        let job_ids: Vec<JobId> = jobs.iter().map(|j| j.id).collect();

        let batch = Batch::new(batch_id, job_ids.clone(), total_operations, options, now);
        self.repo.save_batch(&batch).await?;

        for (written, job) in jobs.iter().enumerate() {
            if let Err(err) = self.repo.save_job(job).await {
                warn!(
                    batch_id = %batch_id,
                    written,
                    error = %err,
                    "job write failed, rolling back submission"
                );
                self.rollback(batch_id, &job_ids[..written]).await;
                return Err(err.into());
            }
        }

        info!(
            batch_id = %batch_id,
            total_jobs = job_ids.len(),
            total_operations,
            batch_size = options.batch_size,
            "batch submitted"
        );

        Ok(SubmitReceipt {
            batch_id,
            total_jobs: job_ids.len(),
            job_ids,
            total_operations,
        })
    }

    /// Best-effort removal of a half-written submission.
    async fn rollback(&self, batch_id: BatchId, job_ids: &[JobId]) {
        for id in job_ids {
            if let Err(err) = self.repo.delete_job(*id).await {
                warn!(job_id = %id, error = %err, "rollback: job delete failed");
            }
        }
        if let Err(err) = self.repo.delete_batch(batch_id).await {
            warn!(batch_id = %batch_id, error = %err, "rollback: batch delete failed");
        }
    }
}
