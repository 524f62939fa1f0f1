//! Batch: the group of jobs created from one client submission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{BatchId, JobId};
use crate::options::BatchOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub job_ids: Vec<JobId>,
    pub total_jobs: usize,
    pub completed_jobs: usize,
    /// Jobs already counted in `completed_jobs`.
    #[serde(default)]
    pub completed_job_ids: Vec<JobId>,
    pub total_operations: usize,
    pub options: BatchOptions,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(
        id: BatchId,
        job_ids: Vec<JobId>,
        total_operations: usize,
        options: BatchOptions,
        now: DateTime<Utc>,
    ) -> Self {
        let total_jobs = job_ids.len();
        Self {
            id,
            job_ids,
            total_jobs,
            completed_jobs: 0,
            completed_job_ids: Vec::new(),
            total_operations,
            options,
            status: if total_jobs == 0 {
                BatchStatus::Completed
            } else {
                BatchStatus::Pending
            },
            created_at: now,
            updated_at: now,
        }
    }

    /// Count a finished job. Returns `false` if it was already counted or is
    /// not part of this batch.
    pub fn record_job_completed(&mut self, job_id: JobId, now: DateTime<Utc>) -> bool {
        if !self.job_ids.contains(&job_id) || self.completed_job_ids.contains(&job_id) {
            return false;
        }

        self.completed_job_ids.push(job_id);
        self.completed_jobs = self.completed_job_ids.len().min(self.total_jobs);
        self.status = if self.completed_jobs == self.total_jobs {
            BatchStatus::Completed
        } else {
            BatchStatus::Processing
        };
        self.updated_at = now;
        true
    }

    pub fn is_completed(&self) -> bool {
        self.status == BatchStatus::Completed
    }
}
