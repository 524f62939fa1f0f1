//! Typed access to job, batch and result records over a `KvStore`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use bulkpatch_core::{Batch, BatchId, Job, JobId, JobResults, JobStatus, OperationResult};

use super::keys::{self, RetentionPolicy};
use crate::store::{KvStore, StoreError};

/// Job repository.
///
/// Every write serializes the whole record; there are no partial updates.
#[derive(Debug)]
pub struct JobRepository<S> {
    store: S,
    retention: RetentionPolicy,
}

impl<S: KvStore> JobRepository<S> {
    pub fn new(store: S, retention: RetentionPolicy) -> Self {
        Self { store, retention }
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key).await? {
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }),
            None => Ok(None),
        }
    }

    async fn write<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: std::time::Duration,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.store.put(key, raw, ttl).await
    }

    /// Write a job record and refresh its TTL.
    pub async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        self.write(&keys::job_key(job.id), job, self.retention.job_ttl)
            .await
    }

    pub async fn load_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.read(&keys::job_key(id)).await
    }

    /// Delete a job record. Idempotent.
    pub async fn delete_job(&self, id: JobId) -> Result<(), StoreError> {
        self.store.delete(&keys::job_key(id)).await
    }

    pub async fn save_batch(&self, batch: &Batch) -> Result<(), StoreError> {
        self.write(&keys::batch_key(batch.id), batch, self.retention.batch_ttl)
            .await
    }

    pub async fn load_batch(&self, id: BatchId) -> Result<Option<Batch>, StoreError> {
        self.read(&keys::batch_key(id)).await
    }

    pub async fn delete_batch(&self, id: BatchId) -> Result<(), StoreError> {
        self.store.delete(&keys::batch_key(id)).await
    }

    pub async fn load_results(&self, id: JobId) -> Result<Option<JobResults>, StoreError> {
        self.read(&keys::results_key(id)).await
    }

    /// Append a slice's results to the job's result record (created on first
    /// use) and rewrite it with the results TTL.
    pub async fn append_results(
        &self,
        job: &Job,
        results: Vec<OperationResult>,
        status: JobStatus,
        now: DateTime<Utc>,
    ) -> Result<JobResults, StoreError> {
        let mut record = self
            .load_results(job.id)
            .await?
            .unwrap_or_else(|| JobResults::new(job.id, job.batch_id, job.total_operations, now));
        record.append(results, status, now);
        self.write(&keys::results_key(job.id), &record, self.retention.results_ttl)
            .await?;
        Ok(record)
    }

    /// Jobs a drain run may pick up, oldest first, at most `limit`.
    ///
    /// Job ids are UUIDv7, so lexical key order is creation order and the
    /// scan stops reading once `limit` drainable records are found. Records
    /// that vanish between listing and reading (completed or expired) are
    /// skipped. Undecodable records are logged and skipped.
    pub async fn list_pending_jobs(&self, limit: usize) -> Result<Vec<Job>, StoreError> {
        let job_keys = self.store.list(&keys::job_prefix()).await?;

        let mut jobs = Vec::with_capacity(limit.min(job_keys.len()));
        for key in job_keys {
            if jobs.len() >= limit {
                break;
            }
            match self.read::<Job>(&key).await {
                Ok(Some(job)) if job.status.is_drainable() => jobs.push(job),
                Ok(_) => {}
                Err(StoreError::Corrupt { key, reason }) => {
                    warn!(key = %key, reason = %reason, "skipping undecodable job record");
                }
                Err(e) => return Err(e),
            }
        }

        jobs.sort_by(|a, b| {
            (a.created_at, a.batch_id, a.sequence).cmp(&(b.created_at, b.batch_id, b.sequence))
        });
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use bulkpatch_core::{BatchOptions, Operation};
    use serde_json::json;

    use super::*;
    use crate::store::InMemoryKvStore;

    fn repo() -> (Arc<InMemoryKvStore>, JobRepository<Arc<InMemoryKvStore>>) {
        let store = Arc::new(InMemoryKvStore::new());
        (store.clone(), JobRepository::new(store, RetentionPolicy::default()))
    }

    fn job(batch_id: BatchId, sequence: u32, created_at: DateTime<Utc>) -> Job {
        let ops = vec![Operation::single(format!("rec-{sequence}"), "f", json!(1))];
        Job::new(batch_id, sequence, sequence as usize, ops, BatchOptions::default(), created_at)
    }

    #[tokio::test]
    async fn job_round_trip_and_idempotent_delete() {
        let (_store, repo) = repo();
        let j = job(BatchId::new(), 0, Utc::now());
        repo.save_job(&j).await.unwrap();
        assert_eq!(repo.load_job(j.id).await.unwrap(), Some(j.clone()));

        repo.delete_job(j.id).await.unwrap();
        repo.delete_job(j.id).await.unwrap();
        assert_eq!(repo.load_job(j.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn pending_list_is_ordered_and_excludes_terminal_jobs() {
        let (_store, repo) = repo();
        let batch = BatchId::new();
        let now = Utc::now();

        let second = job(batch, 1, now);
        let first = job(batch, 0, now);
        let mut failed = job(batch, 2, now);
        failed.mark_failed("boom", now);
        let earlier_batch = job(BatchId::new(), 0, now - chrono::Duration::seconds(5));

        for j in [&second, &first, &failed, &earlier_batch] {
            repo.save_job(j).await.unwrap();
        }

        let pending = repo.list_pending_jobs(10).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![earlier_batch.id, first.id, second.id]);

        assert_eq!(repo.list_pending_jobs(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_job_records_are_skipped() {
        let (store, repo) = repo();
        store
            .put(&format!("{}garbage", keys::job_prefix()), "{not json".into(), std::time::Duration::from_secs(60))
            .await
            .unwrap();
        let j = job(BatchId::new(), 0, Utc::now());
        repo.save_job(&j).await.unwrap();

        let pending = repo.list_pending_jobs(10).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn append_results_accumulates_across_slices() {
        let (_store, repo) = repo();
        let j = job(BatchId::new(), 0, Utc::now());

        repo.append_results(&j, vec![OperationResult::success(0, "a", 1, 2)], JobStatus::Partial, Utc::now())
            .await
            .unwrap();
        let rec = repo
            .append_results(&j, vec![OperationResult::success(1, "b", 1, 2)], JobStatus::Completed, Utc::now())
            .await
            .unwrap();

        assert_eq!(rec.results.len(), 2);
        assert_eq!(repo.load_results(j.id).await.unwrap().unwrap().job_status, JobStatus::Completed);
    }

    /// Counts reads on top of the in-memory store.
    struct CountingStore {
        inner: InMemoryKvStore,
        reads: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl KvStore for CountingStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: String, ttl: std::time::Duration) -> Result<(), StoreError> {
            self.inner.put(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.inner.list(prefix).await
        }
    }

    #[tokio::test]
    async fn pending_scan_stops_at_the_limit() {
        let store = Arc::new(CountingStore {
            inner: InMemoryKvStore::new(),
            reads: AtomicUsize::new(0),
        });
        let repo = JobRepository::new(store.clone(), RetentionPolicy::default());
        let batch = BatchId::new();
        let now = Utc::now();

        let mut saved = Vec::new();
        for sequence in 0..20 {
            let j = job(batch, sequence, now);
            repo.save_job(&j).await.unwrap();
            saved.push(j.id);
        }
        saved.sort_by_key(|id| id.to_string());

        let pending = repo.list_pending_jobs(3).await.unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(store.reads.load(Ordering::SeqCst), 3);
        let mut ids: Vec<_> = pending.iter().map(|j| j.id).collect();
        ids.sort_by_key(|id| id.to_string());
        assert_eq!(ids, saved[..3].to_vec());
    }

    #[tokio::test]
    async fn store_outage_surfaces_from_listing() {
        let (store, repo) = repo();
        store.set_available(false);
        assert!(repo.list_pending_jobs(10).await.unwrap_err().is_unavailable());
    }
}
