//! Batch update engine: submission, persistence, draining, aggregation.
//!
//! ## Flow
//!
//! - `BatchSubmitter` validates a submission, chunks it into jobs and
//!   persists the batch and job records (no downstream calls)
//! - `DrainWorker` consumes pending jobs within a per-run budget,
//!   checkpointing partial progress
//! - `StatusAggregator` serves progress and results to polling clients
//!
//! All state lives in a [`KvStore`](crate::store::KvStore) behind
//! `JobRepository`.

pub mod aggregator;
pub mod cache;
pub mod drain;
pub mod keys;
pub mod repository;
pub mod submitter;

pub use aggregator::{
    AggregatorError, JobState, JobStatusView, QueryKind, ResultFilter, StatusAggregator,
    StatusFormat, parse_job_ids,
};
pub use cache::ResponseCache;
pub use drain::{DrainConfig, DrainError, DrainSummary, DrainWorker};
pub use keys::RetentionPolicy;
pub use repository::JobRepository;
pub use submitter::{BatchSubmitter, MAX_OPERATIONS_PER_SUBMISSION, SubmitError, SubmitReceipt};
