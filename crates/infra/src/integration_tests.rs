//! Integration tests for the full batch pipeline.
//!
//! Tests: Submit → KvStore → DrainWorker → RecordUpdater → Results → Aggregator
//!
//! Verifies:
//! - Budget-limited drains checkpoint and resume without loss or duplication
//! - Per-operation failures end up in results without aborting jobs
//! - Batch completion is counted once per job

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;
    use serde_json::{Value, json};

    use bulkpatch_core::{BatchOptions, JobId, JobStatus, Operation};

    use crate::downstream::{DownstreamError, InMemoryRecordTarget};
    use crate::jobs::{
        BatchSubmitter, DrainConfig, DrainWorker, JobRepository, QueryKind, ResultFilter,
        RetentionPolicy, StatusAggregator, StatusFormat, SubmitError, parse_job_ids,
    };
    use crate::store::InMemoryKvStore;
    use crate::throttle::{AdaptiveRateLimiter, RateLimiterConfig};

    type Store = Arc<InMemoryKvStore>;

    struct Pipeline {
        store: Store,
        repo: Arc<JobRepository<Store>>,
        target: Arc<InMemoryRecordTarget>,
        submitter: BatchSubmitter<Store>,
        worker: DrainWorker<Store, InMemoryRecordTarget>,
        aggregator: StatusAggregator<Store>,
    }

    fn pipeline(budget: usize) -> Pipeline {
        let store: Store = Arc::new(InMemoryKvStore::new());
        let repo = Arc::new(JobRepository::new(store.clone(), RetentionPolicy::default()));
        let target = Arc::new(InMemoryRecordTarget::new());
        let limiter = Arc::new(AdaptiveRateLimiter::new(RateLimiterConfig::default()));
        let worker = DrainWorker::new(
            repo.clone(),
            target.clone(),
            limiter,
            DrainConfig {
                budget,
                host_call_limit: 50,
                max_jobs_per_run: 10,
            },
        );
        Pipeline {
            submitter: BatchSubmitter::new(repo.clone()),
            aggregator: StatusAggregator::new(repo.clone(), Duration::from_secs(3)),
            store,
            repo,
            target,
            worker,
        }
    }

    fn operations(n: usize) -> Vec<Operation> {
        (0..n)
            .map(|i| Operation::single(format!("acct-{i:03}"), "tier", json!("gold")))
            .collect()
    }

    fn statuses(body: &Value) -> Vec<String> {
        body["jobs"]
            .as_array()
            .map(|jobs| {
                jobs.iter()
                    .map(|j| j["status"].as_str().unwrap_or_default().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn status(p: &Pipeline, ids: &[JobId]) -> Value {
        p.aggregator.invalidate();
        p.aggregator.status(ids, StatusFormat::Detailed).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn hundred_twenty_operations_drain_across_runs() {
        let p = pipeline(40);
        p.target.script_failures(
            "acct-005",
            [DownstreamError::Client {
                status: 400,
                message: "tier is read-only".into(),
            }],
        );
        p.target.script_failures(
            "acct-070",
            [DownstreamError::RateLimited {
                retry_after: Some(Duration::from_secs(2)),
            }],
        );

        let receipt = p
            .submitter
            .submit(operations(120), BatchOptions::default())
            .await
            .unwrap();
        assert_eq!(receipt.total_jobs, 3);
        let ids = receipt.job_ids.clone();
        assert_eq!(statuses(&status(&p, &ids).await), ["pending", "pending", "pending"]);

        // Run 1: the first job takes the whole budget.
        let run = p.worker.run().await.unwrap();
        assert_eq!(run.operations_attempted, 40);
        assert_eq!((run.jobs_partial, run.jobs_untouched), (1, 2));
        assert!(run.budget_exhausted);
        assert_eq!(statuses(&status(&p, &ids).await), ["partial", "pending", "pending"]);

        // Run 2: first job finishes (10), second starts (30).
        let run = p.worker.run().await.unwrap();
        assert_eq!(run.operations_attempted, 40);
        assert_eq!((run.jobs_completed, run.jobs_partial, run.jobs_untouched), (1, 1, 1));
        assert_eq!(statuses(&status(&p, &ids).await), ["completed", "partial", "pending"]);
        let second = p.repo.load_job(ids[1]).await.unwrap().unwrap();
        assert_eq!((second.processed_count, second.remaining()), (30, 20));

        // Run 3: the rest.
        let run = p.worker.run().await.unwrap();
        assert_eq!(run.operations_attempted, 40);
        assert_eq!(run.jobs_completed, 2);
        assert_eq!(statuses(&status(&p, &ids).await), ["completed", "completed", "completed"]);

        let idle = p.worker.run().await.unwrap();
        assert_eq!(idle.jobs_considered, 0);

        // 120 operations, one extra call for the rate-limited retry.
        assert_eq!(p.target.calls(), 121);
        assert_eq!(p.target.record_count(), 119);

        let batch = p.repo.load_batch(receipt.batch_id).await.unwrap().unwrap();
        assert!(batch.is_completed());
        assert_eq!(batch.completed_jobs, 3);

        let results = p
            .aggregator
            .results(&ids, StatusFormat::Detailed, ResultFilter::All)
            .await
            .unwrap();
        let summary = &results["summary"];
        assert_eq!(summary["total_results"], json!(120));
        assert_eq!(summary["success_count"], json!(119));
        assert_eq!(summary["error_count"], json!(1));
        assert_eq!(summary["error_categories"]["validation_error"], json!(1));

        let entries: usize = results["jobs"]
            .as_array()
            .unwrap()
            .iter()
            .map(|j| j["results"].as_array().unwrap().len())
            .sum();
        assert_eq!(entries, 120);
    }

    #[tokio::test(start_paused = true)]
    async fn retried_operation_reports_success() {
        let p = pipeline(10);
        p.target.script_failures(
            "acct-000",
            [
                DownstreamError::RateLimited { retry_after: None },
                DownstreamError::RateLimited { retry_after: None },
            ],
        );
        let receipt = p
            .submitter
            .submit(operations(1), BatchOptions::default())
            .await
            .unwrap();
        p.worker.run().await.unwrap();

        let results = p.repo.load_results(receipt.job_ids[0]).await.unwrap().unwrap();
        assert_eq!(results.results.len(), 1);
        assert!(results.results[0].is_success());
        assert_eq!(results.results[0].attempts, 3);
    }

    #[tokio::test]
    async fn overflow_submission_is_rejected_without_records() {
        let p = pipeline(40);
        let err = p
            .submitter
            .submit(operations(501), BatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Validation(_)));
        assert!(p.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_checkpoint_is_reattempted_without_duplicates() {
        let p = pipeline(5);
        let receipt = p
            .submitter
            .submit(operations(8), BatchOptions::default())
            .await
            .unwrap();
        let id = receipt.job_ids[0];
        let before = p.repo.load_job(id).await.unwrap().unwrap();

        p.worker.run().await.unwrap();
        // Lose the checkpoint write, as if the run died after saving results.
        p.repo.save_job(&before).await.unwrap();

        p.worker.run().await.unwrap();
        p.worker.run().await.unwrap();

        assert!(p.repo.load_job(id).await.unwrap().is_none());
        let results = p.repo.load_results(id).await.unwrap().unwrap();
        let indexes: Vec<_> = results.results.iter().map(|r| r.operation_index).collect();
        assert_eq!(indexes, (0..8).collect::<Vec<_>>());
        // at-least-once: the lost slice was sent twice
        assert_eq!(p.target.calls(), 13);

        let batch = p.repo.load_batch(receipt.batch_id).await.unwrap().unwrap();
        assert_eq!(batch.completed_jobs, 1);
    }

    #[tokio::test]
    async fn status_query_with_raw_ids() {
        let p = pipeline(40);
        let receipt = p
            .submitter
            .submit(operations(3), BatchOptions::default())
            .await
            .unwrap();
        let raw: Vec<String> = receipt.job_ids.iter().map(ToString::to_string).collect();
        let ids = parse_job_ids(&raw, QueryKind::Read).unwrap();

        let body = p.aggregator.status(&ids, StatusFormat::Summary).await.unwrap();
        assert_eq!(body["summary"]["total_operations"], json!(3));
        assert_eq!(body["summary"]["by_status"]["pending"], json!(1));
    }

    fn drain_until_idle(len: usize, budget: usize) -> Result<(), TestCaseError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        rt.block_on(async {
            let p = pipeline(budget);
            let options = BatchOptions {
                batch_size: 100,
                rate_limit_delay_ms: 0,
                ..Default::default()
            };
            let receipt = p.submitter.submit(operations(len), options).await.unwrap();
            let id = receipt.job_ids[0];

            let mut processed = 0;
            let mut runs = 0;
            while p.repo.load_job(id).await.unwrap().is_some() {
                let run = p.worker.run().await.unwrap();
                prop_assert!(run.operations_attempted <= budget);
                processed += run.operations_attempted;
                prop_assert!(processed <= len);
                runs += 1;
                prop_assert!(runs <= len);

                if let Some(job) = p.repo.load_job(id).await.unwrap() {
                    prop_assert_eq!(job.status, JobStatus::Partial);
                    prop_assert_eq!(job.processed_count, processed);
                    prop_assert_eq!(job.remaining(), len - processed);
                }
            }

            prop_assert_eq!(processed, len);
            prop_assert_eq!(runs, len.div_ceil(budget));
            prop_assert_eq!(p.target.calls(), len);
            let results = p.repo.load_results(id).await.unwrap().unwrap();
            prop_assert_eq!(results.results.len(), len);
            Ok(())
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn resumed_drains_complete_exactly_the_remainder(len in 1usize..=100, budget in 1usize..=30) {
            drain_until_idle(len, budget)?;
        }
    }
}
