//! Outbound call shaping: adaptive spacing, bounded parallelism, retries.

pub mod call_budget;
pub mod pool;
pub mod rate_limiter;
pub mod retry;

pub use call_budget::CallBudget;
pub use pool::{ConcurrencyPool, PoolClosed};
pub use rate_limiter::{AdaptiveRateLimiter, RateLimiterConfig, RateLimiterStats};
pub use retry::RetryPolicy;
