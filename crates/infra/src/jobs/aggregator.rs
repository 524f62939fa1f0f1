//! Status and results aggregation for polling clients.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use bulkpatch_core::{BatchId, Job, JobId, JobResults, JobStatus, OperationResult};

use super::cache::ResponseCache;
use super::repository::JobRepository;
use crate::store::{KvStore, StoreError};

/// Id cap for read-only (query string) status and results requests.
pub const MAX_READ_IDS: usize = 50;
/// Id cap for bulk (request body) status requests.
pub const MAX_BULK_IDS: usize = 100;

const CACHE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Read,
    Bulk,
}

impl QueryKind {
    pub fn max_ids(&self) -> usize {
        match self {
            QueryKind::Read => MAX_READ_IDS,
            QueryKind::Bulk => MAX_BULK_IDS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFormat {
    #[default]
    Detailed,
    Summary,
    Tabular,
}

impl StatusFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusFormat::Detailed => "detailed",
            StatusFormat::Summary => "summary",
            StatusFormat::Tabular => "tabular",
        }
    }
}

impl FromStr for StatusFormat {
    type Err = AggregatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "detailed" => Ok(StatusFormat::Detailed),
            "summary" => Ok(StatusFormat::Summary),
            "tabular" | "table" => Ok(StatusFormat::Tabular),
            other => Err(AggregatorError::InvalidFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultFilter {
    #[default]
    All,
    OnlySuccessful,
    OnlyErrors,
}

impl ResultFilter {
    /// Build from the two query flags; both set is rejected.
    pub fn from_flags(only_successful: bool, only_errors: bool) -> Result<Self, AggregatorError> {
        match (only_successful, only_errors) {
            (true, true) => Err(AggregatorError::ConflictingFilters),
            (true, false) => Ok(ResultFilter::OnlySuccessful),
            (false, true) => Ok(ResultFilter::OnlyErrors),
            (false, false) => Ok(ResultFilter::All),
        }
    }

    fn keeps(&self, result: &OperationResult) -> bool {
        match self {
            ResultFilter::All => true,
            ResultFilter::OnlySuccessful => result.is_success(),
            ResultFilter::OnlyErrors => !result.is_success(),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ResultFilter::All => "all",
            ResultFilter::OnlySuccessful => "ok",
            ResultFilter::OnlyErrors => "err",
        }
    }
}

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("at least one job id is required")]
    NoIds,

    #[error("too many job ids: {got} (max {max})")]
    TooManyIds { got: usize, max: usize },

    #[error("invalid job id '{0}'")]
    InvalidId(String),

    #[error("unknown format '{0}' (expected detailed, summary or tabular)")]
    InvalidFormat(String),

    #[error("only_successful and only_errors are mutually exclusive")]
    ConflictingFilters,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("none of the requested jobs were found")]
    NotFound,

    /// The jobs exist but no operation has been attempted yet.
    #[error("no results are available yet")]
    NothingCompleted,
}

impl AggregatorError {
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AggregatorError::NoIds
                | AggregatorError::TooManyIds { .. }
                | AggregatorError::InvalidId(_)
                | AggregatorError::InvalidFormat(_)
                | AggregatorError::ConflictingFilters
        )
    }
}

/// Client-facing job state; adds `not_found` to the stored statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Partial,
    Failed,
    NotFound,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::NotFound => "not_found",
            JobState::Pending => JobStatus::Pending.as_str(),
            JobState::Processing => JobStatus::Processing.as_str(),
            JobState::Completed => JobStatus::Completed.as_str(),
            JobState::Partial => JobStatus::Partial.as_str(),
            JobState::Failed => JobStatus::Failed.as_str(),
        }
    }
}

impl From<JobStatus> for JobState {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => JobState::Pending,
            JobStatus::Processing => JobState::Processing,
            JobStatus::Completed => JobState::Completed,
            JobStatus::Partial => JobState::Partial,
            JobStatus::Failed => JobState::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
    pub progress: f64,
    pub processed: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobStatusView {
    fn not_found(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobState::NotFound,
            batch_id: None,
            progress: 0.0,
            processed: 0,
            total: 0,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status.into(),
            batch_id: Some(job.batch_id),
            progress: round2(job.progress_percent()),
            processed: job.processed_count,
            total: job.total_operations,
            error: job.last_error.clone(),
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }

    /// For jobs whose record is gone (completed and deleted) but whose
    /// results are still retained.
    fn from_results(results: &JobResults) -> Self {
        let processed = results.results.len();
        Self {
            job_id: results.job_id,
            status: results.job_status.into(),
            batch_id: Some(results.batch_id),
            progress: round2(percent(processed, results.total_operations)),
            processed,
            total: results.total_operations,
            error: None,
            started_at: None,
            finished_at: Some(results.updated_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusOverview {
    pub total_jobs: usize,
    pub found_jobs: usize,
    pub by_status: BTreeMap<&'static str, usize>,
    pub processed_operations: usize,
    pub total_operations: usize,
    pub progress_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResultsView {
    pub job_id: JobId,
    pub batch_id: BatchId,
    pub job_status: JobState,
    pub total_operations: usize,
    pub attempted: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub results: Vec<OperationResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultsOverview {
    pub total_jobs: usize,
    pub jobs_with_results: usize,
    pub total_results: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub success_rate: f64,
    pub error_categories: BTreeMap<String, usize>,
    /// Requested jobs with no result entries yet.
    pub pending_job_ids: Vec<JobId>,
    pub missing_job_ids: Vec<JobId>,
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 100.0;
    }
    part as f64 * 100.0 / whole as f64
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Parse, de-duplicate and bound a list of raw job ids.
pub fn parse_job_ids<I, T>(raw: I, kind: QueryKind) -> Result<Vec<JobId>, AggregatorError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let mut ids: Vec<JobId> = Vec::new();
    for item in raw {
        let item = item.as_ref().trim();
        if item.is_empty() {
            continue;
        }
        let id = JobId::from_str(item).map_err(|_| AggregatorError::InvalidId(item.to_string()))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        return Err(AggregatorError::NoIds);
    }
    if ids.len() > kind.max_ids() {
        return Err(AggregatorError::TooManyIds {
            got: ids.len(),
            max: kind.max_ids(),
        });
    }
    Ok(ids)
}

/// Aggregate progress: processed over total operations, or the average
/// per-job percentage when no totals are known. ETA extrapolates linearly
/// from the earliest start.
pub fn overview(views: &[JobStatusView], now: DateTime<Utc>) -> StatusOverview {
    let found: Vec<&JobStatusView> = views
        .iter()
        .filter(|v| v.status != JobState::NotFound)
        .collect();

    let mut by_status = BTreeMap::new();
    for view in views {
        *by_status.entry(view.status.as_str()).or_insert(0) += 1;
    }

    let processed: usize = found.iter().map(|v| v.processed).sum();
    let total: usize = found.iter().map(|v| v.total).sum();
    let progress = if total > 0 {
        percent(processed, total)
    } else if !found.is_empty() {
        found.iter().map(|v| v.progress).sum::<f64>() / found.len() as f64
    } else {
        0.0
    };

    let eta_seconds = estimate_remaining(&found, processed, total, now).map(|d| d.as_secs());

    StatusOverview {
        total_jobs: views.len(),
        found_jobs: found.len(),
        by_status,
        processed_operations: processed,
        total_operations: total,
        progress_percent: round2(progress),
        eta_seconds,
    }
}

fn estimate_remaining(
    found: &[&JobStatusView],
    processed: usize,
    total: usize,
    now: DateTime<Utc>,
) -> Option<Duration> {
    if total == 0 || processed == 0 {
        return None;
    }
    if processed >= total {
        return Some(Duration::ZERO);
    }
    let earliest = found.iter().filter_map(|v| v.started_at).min()?;
    let elapsed = (now - earliest).to_std().ok()?;
    let per_op = elapsed.as_secs_f64() / processed as f64;
    Some(Duration::from_secs_f64(per_op * (total - processed) as f64))
}

/// Serves status and results queries, caching rendered responses briefly.
#[derive(Debug)]
pub struct StatusAggregator<S> {
    repo: Arc<JobRepository<S>>,
    cache: ResponseCache<Value>,
}

impl<S: KvStore> StatusAggregator<S> {
    pub fn new(repo: Arc<JobRepository<S>>, cache_ttl: Duration) -> Self {
        Self {
            repo,
            cache: ResponseCache::new(cache_ttl, CACHE_CAPACITY),
        }
    }

    /// Drop cached responses, e.g. after a drain run changed job state.
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    fn cache_key(kind: &str, ids: &[JobId], extra: &str) -> String {
        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
        format!("{kind}|{extra}|{}", ids.join(","))
    }

    /// Look up one job: live record first, then its retained results.
    pub async fn job_status(&self, id: JobId) -> Result<JobStatusView, StoreError> {
        if let Some(job) = self.repo.load_job(id).await? {
            return Ok(JobStatusView::from_job(&job));
        }
        Ok(match self.repo.load_results(id).await? {
            Some(results) => JobStatusView::from_results(&results),
            None => JobStatusView::not_found(id),
        })
    }

    pub async fn status(&self, ids: &[JobId], format: StatusFormat) -> Result<Value, AggregatorError> {
        let key = Self::cache_key("status", ids, format.as_str());
        if let Some(hit) = self.cache.get(&key) {
            debug!(jobs = ids.len(), "status served from cache");
            return Ok(hit);
        }

        let mut views = Vec::with_capacity(ids.len());
        for id in ids {
            views.push(self.job_status(*id).await?);
        }
        if views.iter().all(|v| v.status == JobState::NotFound) {
            return Err(AggregatorError::NotFound);
        }

        let summary = overview(&views, Utc::now());
        let body = match format {
            StatusFormat::Detailed => json!({ "summary": summary, "jobs": views }),
            StatusFormat::Summary => json!({ "summary": summary }),
            StatusFormat::Tabular => json!({
                "summary": summary,
                "columns": ["job_id", "status", "progress", "processed", "total", "error"],
                "rows": views
                    .iter()
                    .map(|v| json!([v.job_id, v.status, v.progress, v.processed, v.total, v.error]))
                    .collect::<Vec<_>>(),
            }),
        };

        self.cache.insert(key, body.clone());
        Ok(body)
    }

    pub async fn results(
        &self,
        ids: &[JobId],
        format: StatusFormat,
        filter: ResultFilter,
    ) -> Result<Value, AggregatorError> {
        let key = Self::cache_key("results", ids, &format!("{}:{}", format.as_str(), filter.as_str()));
        if let Some(hit) = self.cache.get(&key) {
            debug!(jobs = ids.len(), "results served from cache");
            return Ok(hit);
        }

        let mut views = Vec::new();
        let mut pending = Vec::new();
        let mut missing = Vec::new();
        for id in ids {
            match self.repo.load_results(*id).await? {
                Some(record) if !record.results.is_empty() => views.push(record),
                _ => match self.repo.load_job(*id).await? {
                    Some(_) => pending.push(*id),
                    None => missing.push(*id),
                },
            }
        }

        if views.is_empty() {
            return Err(if pending.is_empty() {
                AggregatorError::NotFound
            } else {
                AggregatorError::NothingCompleted
            });
        }

        let mut error_categories = BTreeMap::new();
        let mut success_count = 0;
        let mut error_count = 0;
        for result in views.iter().flat_map(|r| r.results.iter()) {
            if result.is_success() {
                success_count += 1;
            } else {
                error_count += 1;
                let code = result.error_code.clone().unwrap_or_else(|| "unknown".to_string());
                *error_categories.entry(code).or_insert(0) += 1;
            }
        }
        let total_results = success_count + error_count;

        let summary = ResultsOverview {
            total_jobs: ids.len(),
            jobs_with_results: views.len(),
            total_results,
            success_count,
            error_count,
            success_rate: round2(percent(success_count, total_results)),
            error_categories,
            pending_job_ids: pending,
            missing_job_ids: missing,
        };

        let jobs: Vec<JobResultsView> = views
            .into_iter()
            .map(|record| JobResultsView {
                job_id: record.job_id,
                batch_id: record.batch_id,
                job_status: record.job_status.into(),
                total_operations: record.total_operations,
                attempted: record.results.len(),
                success_count: record.success_count(),
                error_count: record.error_count(),
                results: record.results.into_iter().filter(|r| filter.keeps(r)).collect(),
            })
            .collect();

        let body = match format {
            StatusFormat::Detailed => json!({ "summary": summary, "jobs": jobs }),
            StatusFormat::Summary => json!({
                "summary": summary,
                "jobs": jobs
                    .iter()
                    .map(|j| json!({
                        "job_id": j.job_id,
                        "job_status": j.job_status,
                        "attempted": j.attempted,
                        "success_count": j.success_count,
                        "error_count": j.error_count,
                    }))
                    .collect::<Vec<_>>(),
            }),
            StatusFormat::Tabular => json!({
                "summary": summary,
                "columns": [
                    "job_id", "operation_index", "target_id", "status",
                    "error_code", "error", "attempts", "processing_time_ms"
                ],
                "rows": jobs
                    .iter()
                    .flat_map(|j| j.results.iter().map(move |r| json!([
                        j.job_id, r.operation_index, r.target_id, r.status,
                        r.error_code, r.error, r.attempts, r.processing_time_ms
                    ])))
                    .collect::<Vec<_>>(),
            }),
        };

        self.cache.insert(key, body.clone());
        Ok(body)
    }
}
