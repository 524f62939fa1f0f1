//! Key namespace and retention for persisted records.

use std::time::Duration;

use bulkpatch_core::{BatchId, JobId};

pub const NAMESPACE: &str = "bulkpatch";

pub fn job_prefix() -> String {
    format!("{NAMESPACE}:job:")
}

pub fn job_key(id: JobId) -> String {
    format!("{NAMESPACE}:job:{id}")
}

pub fn batch_key(id: BatchId) -> String {
    format!("{NAMESPACE}:batch:{id}")
}

pub fn results_key(id: JobId) -> String {
    format!("{NAMESPACE}:results:{id}")
}

/// Per-record-kind TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Refreshed at every checkpoint.
    pub job_ttl: Duration,
    /// Lifetime of the whole submission.
    pub batch_ttl: Duration,
    /// Must outlive `job_ttl` so slow pollers still see outcomes.
    pub results_ttl: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            job_ttl: Duration::from_secs(60 * 60),
            batch_ttl: Duration::from_secs(24 * 60 * 60),
            results_ttl: Duration::from_secs(48 * 60 * 60),
        }
    }
}

impl RetentionPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.job_ttl.is_zero() {
            return Err("job TTL must be positive".to_string());
        }
        if self.results_ttl <= self.job_ttl {
            return Err(format!(
                "results TTL ({}s) must exceed job TTL ({}s)",
                self.results_ttl.as_secs(),
                self.job_ttl.as_secs()
            ));
        }
        if self.batch_ttl < self.job_ttl {
            return Err(format!(
                "batch TTL ({}s) must be at least the job TTL ({}s)",
                self.batch_ttl.as_secs(),
                self.job_ttl.as_secs()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_kind() {
        let id = JobId::new();
        assert!(job_key(id).starts_with(&job_prefix()));
        assert!(!results_key(id).starts_with(&job_prefix()));
        assert!(batch_key(BatchId::new()).starts_with("bulkpatch:batch:"));
    }

    #[test]
    fn results_must_outlive_jobs() {
        assert!(RetentionPolicy::default().validate().is_ok());
        let bad = RetentionPolicy {
            results_ttl: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
