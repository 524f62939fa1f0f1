//! Per-submission processing options.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const MAX_BATCH_SIZE: usize = 100;
pub const DEFAULT_CONCURRENCY: usize = 2;
pub const MAX_CONCURRENCY: usize = 10;
pub const DEFAULT_RATE_LIMIT_DELAY_MS: u64 = 500;
pub const MAX_RATE_LIMIT_DELAY_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const MAX_RETRIES_CAP: u32 = 10;

/// Options chosen by the submitting client.
///
/// Copied onto every job of the batch so the drain worker never needs the
/// batch record to dispatch a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Operations per job.
    pub batch_size: usize,
    /// In-flight downstream calls per job.
    pub concurrency: usize,
    /// Minimum spacing between downstream calls for this batch.
    pub rate_limit_delay_ms: u64,
    /// Retries per operation after the first attempt.
    pub max_retries: u32,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            rate_limit_delay_ms: DEFAULT_RATE_LIMIT_DELAY_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl BatchOptions {
    /// Reject out-of-range values (no clamping).
    pub fn validate(&self) -> DomainResult<()> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(DomainError::validation(format!(
                "batch_size must be between 1 and {MAX_BATCH_SIZE}"
            )));
        }
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(DomainError::validation(format!(
                "concurrency must be between 1 and {MAX_CONCURRENCY}"
            )));
        }
        if self.rate_limit_delay_ms > MAX_RATE_LIMIT_DELAY_MS {
            return Err(DomainError::validation(format!(
                "rate_limit_delay_ms must not exceed {MAX_RATE_LIMIT_DELAY_MS}"
            )));
        }
        if self.max_retries > MAX_RETRIES_CAP {
            return Err(DomainError::validation(format!(
                "max_retries must not exceed {MAX_RETRIES_CAP}"
            )));
        }
        Ok(())
    }

    pub fn rate_limit_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.rate_limit_delay_ms)
    }
}
