//! Retry policy for a single downstream call.

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::debug;

use bulkpatch_core::{BatchOptions, Operation, OperationResult};

use super::call_budget::CallBudget;
use super::rate_limiter::AdaptiveRateLimiter;
use crate::downstream::{DownstreamError, RecordUpdater};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_backoff: Duration,
    /// Sleep after a rate-limit signal that carried no wait-hint.
    pub default_rate_limit_wait: Duration,
    /// Upper bound on any wait-hint we honour.
    pub max_rate_limit_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: bulkpatch_core::options::DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            default_rate_limit_wait: Duration::from_secs(5),
            max_rate_limit_wait: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn for_options(options: &BatchOptions) -> Self {
        Self {
            max_retries: options.max_retries,
            ..Self::default()
        }
    }

    /// `base * 2^attempt`, capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    fn pause_after(&self, error: &DownstreamError, attempt: u32) -> Duration {
        match error {
            DownstreamError::RateLimited { retry_after } => retry_after
                .unwrap_or(self.default_rate_limit_wait)
                .min(self.max_rate_limit_wait),
            _ => self.backoff_for(attempt),
        }
    }

    /// Attempt `operation` until it succeeds, fails permanently or runs out
    /// of retries. Every attempt reserves a call from `calls`, waits on the
    /// limiter and reports back to it.
    ///
    /// Returns `None` when `calls` refuses an attempt, leaving the operation
    /// for a later run. With `settle_on_limit`, an operation that already
    /// made a call is instead settled as a failure carrying its last error.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute<U>(
        &self,
        operation_index: usize,
        operation: &Operation,
        updater: &U,
        limiter: &AdaptiveRateLimiter,
        min_spacing: Duration,
        calls: &CallBudget,
        settle_on_limit: bool,
    ) -> Option<OperationResult>
    where
        U: RecordUpdater + ?Sized,
    {
        let started = Instant::now();
        let mut attempt = 0u32;
        let mut last_error: Option<DownstreamError> = None;

        loop {
            if !calls.try_acquire() {
                debug!(
                    operation_index,
                    target_id = %operation.target_id,
                    attempts = attempt,
                    ceiling = calls.ceiling(),
                    "call ceiling reached"
                );
                return match last_error {
                    Some(err) if settle_on_limit => Some(OperationResult::failure(
                        operation_index,
                        operation.target_id.clone(),
                        err.code(),
                        &format!("{err} (call limit reached before retry)"),
                        attempt,
                        Some(elapsed_ms(started)),
                    )),
                    _ => None,
                };
            }
            limiter.wait_with_floor(min_spacing).await;

            let err = match updater.apply(operation).await {
                Ok(()) => {
                    limiter.record_success();
                    return Some(OperationResult::success(
                        operation_index,
                        operation.target_id.clone(),
                        attempt + 1,
                        elapsed_ms(started),
                    ));
                }
                Err(err) => err,
            };
            limiter.record_error(&err);

            if !err.is_transient() || attempt >= self.max_retries {
                return Some(OperationResult::failure(
                    operation_index,
                    operation.target_id.clone(),
                    err.code(),
                    &err.to_string(),
                    attempt + 1,
                    Some(elapsed_ms(started)),
                ));
            }

            let pause = self.pause_after(&err, attempt);
            debug!(
                operation_index,
                target_id = %operation.target_id,
                attempt = attempt + 1,
                code = err.code(),
                pause_ms = pause.as_millis() as u64,
                "retrying downstream call"
            );
            sleep(pause).await;
            attempt += 1;
            last_error = Some(err);
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}
