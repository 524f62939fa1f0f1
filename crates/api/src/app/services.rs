//! Service wiring: store, downstream adapter, and the engine components
//! built on top of them. Constructed once at startup and shared by every
//! handler and the background drain loop.

use std::sync::Arc;

use bulkpatch_infra::downstream::{HttpRecordUpdater, InMemoryRecordTarget, RecordUpdater};
use bulkpatch_infra::jobs::{
    BatchSubmitter, DrainError, DrainSummary, DrainWorker, JobRepository, StatusAggregator,
};
use bulkpatch_infra::store::{InMemoryKvStore, KvStore};
use bulkpatch_infra::throttle::AdaptiveRateLimiter;

use crate::config::AppConfig;

pub type DynStore = Arc<dyn KvStore>;

pub struct AppServices {
    pub repo: Arc<JobRepository<DynStore>>,
    pub submitter: BatchSubmitter<DynStore>,
    pub drain: DrainWorker<DynStore, dyn RecordUpdater>,
    pub aggregator: StatusAggregator<DynStore>,
    pub limiter: Arc<AdaptiveRateLimiter>,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("drain", &self.drain)
            .finish_non_exhaustive()
    }
}

impl AppServices {
    pub fn new(store: DynStore, updater: Arc<dyn RecordUpdater>, config: &AppConfig) -> Self {
        let repo = Arc::new(JobRepository::new(store, config.retention));
        let limiter = Arc::new(AdaptiveRateLimiter::new(config.rate_limiter.clone()));

        Self {
            submitter: BatchSubmitter::new(repo.clone()),
            drain: DrainWorker::new(repo.clone(), updater, limiter.clone(), config.drain),
            aggregator: StatusAggregator::new(repo.clone(), config.status_cache_ttl),
            repo,
            limiter,
        }
    }

    /// One drain run, shared by the manual trigger and the scheduler.
    ///
    /// Cached status responses are dropped afterwards since job state moved.
    pub async fn run_drain(&self) -> Result<DrainSummary, DrainError> {
        let outcome = self.drain.run().await;
        if !matches!(outcome, Err(DrainError::AlreadyRunning)) {
            self.aggregator.invalidate();
        }
        outcome
    }
}

/// Build services from configuration.
///
/// - `REDIS_URL` set: Redis-backed store (requires the `redis` feature)
/// - `DOWNSTREAM_URL` set: HTTP record updater
/// - otherwise in-memory stand-ins for local development
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let store: DynStore = match &config.redis_url {
        #[cfg(feature = "redis")]
        Some(url) => {
            let store = bulkpatch_infra::store::RedisKvStore::connect(url, Default::default()).await?;
            tracing::info!("using redis job store");
            Arc::new(store)
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => anyhow::bail!("REDIS_URL is set but this build lacks the `redis` feature"),
        None => {
            tracing::warn!("REDIS_URL not set; jobs are kept in process memory");
            Arc::new(InMemoryKvStore::new())
        }
    };

    let updater: Arc<dyn RecordUpdater> = match &config.downstream {
        Some(downstream) => {
            tracing::info!(base_url = %downstream.base_url, "using http record updater");
            Arc::new(HttpRecordUpdater::new(downstream.clone())?)
        }
        None => {
            tracing::warn!("DOWNSTREAM_URL not set; updates go to an in-memory record target");
            Arc::new(InMemoryRecordTarget::new())
        }
    };

    Ok(AppServices::new(store, updater, config))
}
