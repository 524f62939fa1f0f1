//! Request/response DTOs and mapping to engine types.

use serde::{Deserialize, Serialize};

use bulkpatch_core::{BatchId, BatchOptions, FieldMap, JobId, Operation};
use bulkpatch_infra::jobs::SubmitReceipt;

#[derive(Debug, Clone, Deserialize)]
pub struct OperationDto {
    #[serde(alias = "targetId")]
    pub target_id: String,
    #[serde(default)]
    pub fields: FieldMap,
}

impl From<OperationDto> for Operation {
    fn from(dto: OperationDto) -> Self {
        Operation::new(dto.target_id, dto.fields)
    }
}

/// Options as sent by clients; omitted values take the engine defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BatchOptionsDto {
    #[serde(alias = "batchSize")]
    pub batch_size: Option<usize>,
    pub concurrency: Option<usize>,
    #[serde(alias = "rateLimitDelay", alias = "rate_limit_delay")]
    pub rate_limit_delay_ms: Option<u64>,
    #[serde(alias = "maxRetries")]
    pub max_retries: Option<u32>,
}

impl From<BatchOptionsDto> for BatchOptions {
    fn from(dto: BatchOptionsDto) -> Self {
        let defaults = BatchOptions::default();
        BatchOptions {
            batch_size: dto.batch_size.unwrap_or(defaults.batch_size),
            concurrency: dto.concurrency.unwrap_or(defaults.concurrency),
            rate_limit_delay_ms: dto.rate_limit_delay_ms.unwrap_or(defaults.rate_limit_delay_ms),
            max_retries: dto.max_retries.unwrap_or(defaults.max_retries),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitBatchRequest {
    pub operations: Vec<OperationDto>,
    #[serde(default)]
    pub options: BatchOptionsDto,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitBatchResponse {
    pub batch_id: BatchId,
    pub job_ids: Vec<JobId>,
    pub total_jobs: usize,
    pub total_operations: usize,
}

impl From<SubmitReceipt> for SubmitBatchResponse {
    fn from(r: SubmitReceipt) -> Self {
        Self {
            batch_id: r.batch_id,
            job_ids: r.job_ids,
            total_jobs: r.total_jobs,
            total_operations: r.total_operations,
        }
    }
}

/// `GET /jobs/status` query string; `ids` is comma separated.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatusQuery {
    pub ids: String,
    pub format: Option<String>,
}

/// `POST /jobs/status` body.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkStatusRequest {
    #[serde(alias = "jobIds")]
    pub job_ids: Vec<String>,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResultsQuery {
    pub ids: String,
    pub format: Option<String>,
    #[serde(alias = "onlySuccessful")]
    pub only_successful: bool,
    #[serde(alias = "onlyErrors")]
    pub only_errors: bool,
}

pub fn split_ids(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}
