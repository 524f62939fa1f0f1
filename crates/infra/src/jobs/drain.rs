//! Resumable, budget-constrained drain worker.
//!
//! One run walks the oldest drainable jobs in order. Each job gets a slice of
//! at most `budget - attempted_so_far` operations, dispatched through a
//! per-job [`ConcurrencyPool`] with every call wrapped by the
//! [`RetryPolicy`]. Once the slice is fully attempted the job is
//! checkpointed: its record keeps only the unprocessed remainder, so a run
//! cut short at any point resumes from the last checkpoint.
//!
//! Every downstream call of a run, retries included, is drawn from one
//! [`CallBudget`] capped at `host_call_limit`. Operations refused a call are
//! not recorded; only the attempted prefix of a slice is checkpointed, and
//! the slice head is always settled so each run makes progress.
//!
//! Only one run may be active per process. Cross-process exclusion must be
//! provided by whoever schedules the runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use bulkpatch_core::{Job, JobStatus, Operation, OperationResult};

use super::repository::JobRepository;
use crate::downstream::RecordUpdater;
use crate::store::{KvStore, StoreError};
use crate::throttle::{
    AdaptiveRateLimiter, CallBudget, ConcurrencyPool, RateLimiterStats, RetryPolicy,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainConfig {
    /// Downstream operations dispatched per run.
    pub budget: usize,
    /// Hard per-invocation ceiling of the host; `budget` stays below it so
    /// retries have headroom.
    pub host_call_limit: usize,
    pub max_jobs_per_run: usize,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            budget: 40,
            host_call_limit: 50,
            max_jobs_per_run: 10,
        }
    }
}

impl DrainConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.budget == 0 {
            return Err("drain budget must be positive".to_string());
        }
        if self.budget >= self.host_call_limit {
            return Err(format!(
                "drain budget ({}) must stay below the host call limit ({})",
                self.budget, self.host_call_limit
            ));
        }
        if self.max_jobs_per_run == 0 {
            return Err("max jobs per run must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DrainError {
    #[error("a drain run is already in progress")]
    AlreadyRunning,

    /// The pending-job listing failed; nothing was touched.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Structured outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct DrainSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub budget: usize,
    pub host_call_limit: usize,
    /// Downstream calls made, retries included.
    pub downstream_calls: usize,
    pub jobs_considered: usize,
    pub jobs_processed: usize,
    pub jobs_completed: usize,
    pub jobs_partial: usize,
    pub jobs_failed: usize,
    /// Left for a later run because the budget ran out or the run aborted.
    pub jobs_untouched: usize,
    pub operations_attempted: usize,
    pub operations_succeeded: usize,
    pub operations_failed: usize,
    /// Dispatched but left in the remainder because the call ceiling was hit.
    pub operations_deferred: usize,
    /// Failed operations per error code.
    pub error_codes: BTreeMap<String, usize>,
    pub budget_exhausted: bool,
    /// Set when the run stopped early because the store became unavailable.
    pub store_error: Option<String>,
    pub rate_limiter: RateLimiterStats,
}

impl DrainSummary {
    fn start(config: &DrainConfig, rate_limiter: RateLimiterStats) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::now_v7(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            budget: config.budget,
            host_call_limit: config.host_call_limit,
            downstream_calls: 0,
            jobs_considered: 0,
            jobs_processed: 0,
            jobs_completed: 0,
            jobs_partial: 0,
            jobs_failed: 0,
            jobs_untouched: 0,
            operations_attempted: 0,
            operations_succeeded: 0,
            operations_failed: 0,
            operations_deferred: 0,
            error_codes: BTreeMap::new(),
            budget_exhausted: false,
            store_error: None,
            rate_limiter,
        }
    }

    fn record_results(&mut self, results: &[OperationResult]) {
        self.operations_attempted += results.len();
        for result in results {
            if result.is_success() {
                self.operations_succeeded += 1;
            } else {
                self.operations_failed += 1;
                let code = result.error_code.as_deref().unwrap_or("unknown");
                *self.error_codes.entry(code.to_string()).or_default() += 1;
            }
        }
    }

    pub fn remaining_budget(&self) -> usize {
        self.budget.saturating_sub(self.operations_attempted)
    }
}

/// How a single job left the run.
enum JobOutcome {
    Completed,
    Partial,
    Failed,
}

pub struct DrainWorker<S, U: ?Sized> {
    repo: Arc<JobRepository<S>>,
    updater: Arc<U>,
    limiter: Arc<AdaptiveRateLimiter>,
    config: DrainConfig,
    run_lock: Mutex<()>,
}

impl<S, U> std::fmt::Debug for DrainWorker<S, U>
where
    U: ?Sized,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainWorker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S, U> DrainWorker<S, U>
where
    S: KvStore,
    U: RecordUpdater + ?Sized + 'static,
{
    pub fn new(
        repo: Arc<JobRepository<S>>,
        updater: Arc<U>,
        limiter: Arc<AdaptiveRateLimiter>,
        config: DrainConfig,
    ) -> Self {
        Self {
            repo,
            updater,
            limiter,
            config,
            run_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> DrainConfig {
        self.config
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Execute one drain run.
    pub async fn run(&self) -> Result<DrainSummary, DrainError> {
        let _running = self
            .run_lock
            .try_lock()
            .map_err(|_| DrainError::AlreadyRunning)?;

        let clock = Instant::now();
        let mut summary = DrainSummary::start(&self.config, self.limiter.snapshot());
        let calls = Arc::new(CallBudget::new(self.config.host_call_limit));

        let jobs = self
            .repo
            .list_pending_jobs(self.config.max_jobs_per_run)
            .await?;
        summary.jobs_considered = jobs.len();
        info!(
            run_id = %summary.run_id,
            pending = jobs.len(),
            budget = self.config.budget,
            "drain run started"
        );

        let mut jobs = jobs.into_iter();
        while let Some(job) = jobs.next() {
            let available = summary.remaining_budget();
            if available == 0 || calls.used() >= self.config.budget {
                summary.budget_exhausted = true;
                summary.jobs_untouched += 1 + jobs.len();
                break;
            }

            match self.process_job(job, available, &calls, &mut summary).await {
                Ok(JobOutcome::Completed) => summary.jobs_completed += 1,
                Ok(JobOutcome::Partial) => summary.jobs_partial += 1,
                Ok(JobOutcome::Failed) => summary.jobs_failed += 1,
                Err(err) => {
                    error!(run_id = %summary.run_id, error = %err, "store unavailable, aborting drain run");
                    summary.jobs_failed += 1;
                    summary.jobs_untouched += jobs.len();
                    summary.store_error = Some(err.to_string());
                    break;
                }
            }
            summary.jobs_processed += 1;
        }
        summary.downstream_calls = calls.used();
        if summary.remaining_budget() == 0 || summary.downstream_calls >= self.config.budget {
            summary.budget_exhausted = true;
        }

        summary.finished_at = Utc::now();
        summary.duration_ms = clock.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        summary.rate_limiter = self.limiter.snapshot();

        info!(
            run_id = %summary.run_id,
            duration_ms = summary.duration_ms,
            jobs_processed = summary.jobs_processed,
            jobs_completed = summary.jobs_completed,
            jobs_partial = summary.jobs_partial,
            jobs_failed = summary.jobs_failed,
            jobs_untouched = summary.jobs_untouched,
            operations_attempted = summary.operations_attempted,
            downstream_calls = summary.downstream_calls,
            operations_failed = summary.operations_failed,
            budget_exhausted = summary.budget_exhausted,
            "drain run finished"
        );
        Ok(summary)
    }

    /// Dispatch one slice of `job` and checkpoint it.
    ///
    /// `Err` means the store is unavailable and the run must stop.
    async fn process_job(
        &self,
        mut job: Job,
        available: usize,
        calls: &Arc<CallBudget>,
        summary: &mut DrainSummary,
    ) -> Result<JobOutcome, StoreError> {
        if let Err(err) = job.check_invariants() {
            warn!(job_id = %job.id, error = %err, "job record is inconsistent");
            return self.fail_job(job, err.to_string()).await;
        }

        job.mark_processing(Utc::now());
        if let Err(err) = self.repo.save_job(&job).await {
            return self.fail_on_store_error(job, err).await;
        }

        let first_index = job.next_operation_index();
        let slice = job.next_slice(available).to_vec();
        let (results, deferred) = self.dispatch(&job, first_index, slice, calls).await;
        summary.record_results(&results);
        summary.operations_deferred += deferred;

        let attempted = results.len();
        let status = match job.checkpoint(attempted, Utc::now()) {
            Ok(status) => status,
            Err(err) => return self.fail_job(job, err.to_string()).await,
        };

        // Results go first: a crash before the job write re-attempts the
        // slice, and the re-attempt replaces these entries by index.
        if let Err(err) = self.repo.append_results(&job, results, status, Utc::now()).await {
            return self.fail_on_store_error(job, err).await;
        }

        if status == JobStatus::Completed {
            if let Err(err) = self.complete_job(&job).await {
                return self.fail_on_store_error(job, err).await;
            }
            info!(
                job_id = %job.id,
                batch_id = %job.batch_id,
                attempted,
                total = job.total_operations,
                "job completed"
            );
            Ok(JobOutcome::Completed)
        } else {
            if let Err(err) = self.repo.save_job(&job).await {
                return self.fail_on_store_error(job, err).await;
            }
            info!(
                job_id = %job.id,
                attempted,
                deferred,
                processed = job.processed_count,
                remaining = job.remaining(),
                "job checkpointed"
            );
            Ok(JobOutcome::Partial)
        }
    }

    async fn dispatch(
        &self,
        job: &Job,
        first_index: usize,
        slice: Vec<Operation>,
        calls: &Arc<CallBudget>,
    ) -> (Vec<OperationResult>, usize) {
        let dispatched = slice.len();
        let pool = ConcurrencyPool::new(job.options.concurrency);
        let policy = RetryPolicy::for_options(&job.options);
        let spacing = job.options.rate_limit_delay();

        let mut handles = Vec::with_capacity(slice.len());
        for (i, operation) in slice.into_iter().enumerate() {
            let index = first_index + i;
            let target_id = operation.target_id.clone();
            let updater = self.updater.clone();
            let limiter = self.limiter.clone();
            let policy = policy.clone();
            let calls = calls.clone();
            let settle_on_limit = i == 0;

            let handle = pool
                .run(async move {
                    policy
                        .execute(
                            index,
                            &operation,
                            &*updater,
                            &limiter,
                            spacing,
                            &calls,
                            settle_on_limit,
                        )
                        .await
                })
                .await;
            handles.push((index, target_id, handle));
        }
        pool.drain().await;

        // Only the prefix up to the first deferred operation can be
        // checkpointed; anything after it is re-sent by a later run.
        let mut results = Vec::with_capacity(handles.len());
        let mut gap = false;
        for (index, target_id, handle) in handles {
            let result = match handle {
                Ok(handle) => match handle.await {
                    Ok(Some(result)) => result,
                    Ok(None) => {
                        gap = true;
                        continue;
                    }
                    Err(err) => OperationResult::failure(
                        index,
                        target_id,
                        "internal_error",
                        &format!("operation task failed: {err}"),
                        1,
                        None,
                    ),
                },
                Err(err) => OperationResult::failure(index, target_id, "internal_error", &err.to_string(), 0, None),
            };
            if !gap {
                results.push(result);
            }
        }
        let deferred = dispatched - results.len();
        (results, deferred)
    }

    /// Count the job on its batch, then delete the job record.
    ///
    /// A batch record that cannot be read or written back does not keep the
    /// finished job around; only store unavailability aborts.
    async fn complete_job(&self, job: &Job) -> Result<(), StoreError> {
        if let Err(err) = self.count_on_batch(job).await {
            if err.is_unavailable() {
                return Err(err);
            }
            error!(
                job_id = %job.id,
                batch_id = %job.batch_id,
                error = %err,
                "could not count completed job on its batch"
            );
        }
        self.repo.delete_job(job.id).await
    }

    async fn count_on_batch(&self, job: &Job) -> Result<(), StoreError> {
        match self.repo.load_batch(job.batch_id).await? {
            Some(mut batch) => {
                if batch.record_job_completed(job.id, Utc::now()) {
                    self.repo.save_batch(&batch).await?;
                    if batch.is_completed() {
                        info!(batch_id = %batch.id, total_jobs = batch.total_jobs, "batch completed");
                    }
                }
            }
            None => warn!(job_id = %job.id, batch_id = %job.batch_id, "batch record missing"),
        }
        Ok(())
    }

    async fn fail_on_store_error(&self, job: Job, err: StoreError) -> Result<JobOutcome, StoreError> {
        if err.is_unavailable() {
            let mut job = job;
            job.mark_failed(err.to_string(), Utc::now());
            // The store is down; this write is expected to fail too.
            let _ = self.repo.save_job(&job).await;
            return Err(err);
        }
        self.fail_job(job, err.to_string()).await
    }

    async fn fail_job(&self, mut job: Job, reason: String) -> Result<JobOutcome, StoreError> {
        error!(job_id = %job.id, batch_id = %job.batch_id, reason = %reason, "job failed");
        job.mark_failed(reason, Utc::now());
        match self.repo.save_job(&job).await {
            Err(err) if err.is_unavailable() => Err(err),
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "could not persist failed job");
                Ok(JobOutcome::Failed)
            }
            Ok(()) => Ok(JobOutcome::Failed),
        }
    }
}
