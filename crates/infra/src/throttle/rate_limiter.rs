//! Adaptive rate limiter.
//!
//! Keeps a sliding window of call and error timestamps and derives the
//! spacing between downstream calls from it:
//!
//! - errors crossing a threshold, or a window crowded past the high-load
//!   mark, grow the delay multiplicatively;
//! - every Nth consecutive success, or a quiet period, shrinks it;
//! - a rate-limit signal jumps straight to the maximum, or to the wait-hint
//!   the service sent (bounded by the maximum, never below the current delay).
//!
//! A burst guard adds a fixed penalty when too many calls landed in the last
//! few seconds, regardless of the computed delay.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use crate::downstream::DownstreamError;

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    pub initial_delay: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Sliding window for call and error history.
    pub window: Duration,
    /// Errors in the window that trigger an increase.
    pub error_threshold: usize,
    /// Calls in the window that trigger an increase.
    pub high_load_threshold: usize,
    pub increase_factor: f64,
    pub decrease_factor: f64,
    /// Consecutive successes per decrease step.
    pub success_streak: u32,
    /// Quiet period after which the delay is relaxed once.
    pub idle_after: Duration,
    pub burst_window: Duration,
    pub burst_limit: usize,
    pub burst_penalty: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            window: Duration::from_secs(60),
            error_threshold: 3,
            high_load_threshold: 50,
            increase_factor: 1.5,
            decrease_factor: 0.9,
            success_streak: 5,
            idle_after: Duration::from_secs(30),
            burst_window: Duration::from_secs(5),
            burst_limit: 10,
            burst_penalty: Duration::from_secs(1),
        }
    }
}

impl RateLimiterConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_delay > self.max_delay {
            return Err(format!(
                "min delay {}ms exceeds max delay {}ms",
                self.min_delay.as_millis(),
                self.max_delay.as_millis()
            ));
        }
        if self.increase_factor <= 1.0 || self.decrease_factor <= 0.0 || self.decrease_factor >= 1.0 {
            return Err("increase factor must be > 1 and decrease factor in (0, 1)".to_string());
        }
        if self.success_streak == 0 {
            return Err("success streak must be positive".to_string());
        }
        Ok(())
    }
}

/// Point-in-time view of the limiter, included in drain summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimiterStats {
    pub current_delay_ms: u64,
    pub calls_in_window: usize,
    pub errors_in_window: usize,
    pub consecutive_successes: u32,
    pub consecutive_errors: u32,
    pub total_calls: u64,
    pub total_errors: u64,
    pub rate_limited: u64,
}

#[derive(Debug)]
struct LimiterState {
    current_delay: Duration,
    /// Latest reserved call slot; may lie in the future while a caller sleeps.
    last_call: Option<Instant>,
    calls: VecDeque<Instant>,
    errors: VecDeque<Instant>,
    consecutive_successes: u32,
    consecutive_errors: u32,
    total_calls: u64,
    total_errors: u64,
    rate_limited: u64,
}

/// Shared by every task of a drain run; callers must report each attempt
/// through exactly one of [`record_success`](Self::record_success) or
/// [`record_error`](Self::record_error).
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    config: RateLimiterConfig,
    state: Mutex<LimiterState>,
}

impl AdaptiveRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let current_delay = config.initial_delay.clamp(config.min_delay, config.max_delay);
        Self {
            config,
            state: Mutex::new(LimiterState {
                current_delay,
                last_call: None,
                calls: VecDeque::new(),
                errors: VecDeque::new(),
                consecutive_successes: 0,
                consecutive_errors: 0,
                total_calls: 0,
                total_errors: 0,
                rate_limited: 0,
            }),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        // Every critical section leaves the state consistent, so a poisoned
        // lock is still usable.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn current_delay(&self) -> Duration {
        self.lock().current_delay
    }

    /// Block until the current delay has elapsed since the previous call,
    /// then count this call.
    pub async fn wait(&self) {
        self.wait_with_floor(Duration::ZERO).await
    }

    /// Like [`wait`](Self::wait), spacing calls by at least `floor` even when
    /// the adaptive delay is lower.
    pub async fn wait_with_floor(&self, floor: Duration) {
        let slot = {
            let mut state = self.lock();
            let now = Instant::now();
            self.prune(&mut state, now);

            if let Some(last) = state.last_call {
                if now.saturating_duration_since(last) >= self.config.idle_after {
                    self.decrease(&mut state);
                }
            }
            if state.calls.len() > self.config.high_load_threshold {
                self.increase(&mut state);
                debug!(
                    calls = state.calls.len(),
                    delay_ms = state.current_delay.as_millis() as u64,
                    "high call volume, slowing down"
                );
            }

            let spacing = state.current_delay.max(floor);
            let mut slot = match state.last_call {
                Some(last) => (last + spacing).max(now),
                None => now,
            };

            let recent = state
                .calls
                .iter()
                .filter(|t| slot.saturating_duration_since(**t) <= self.config.burst_window)
                .count();
            if recent >= self.config.burst_limit {
                slot += self.config.burst_penalty;
                debug!(recent, "burst guard engaged");
            }

            state.last_call = Some(slot);
            state.calls.push_back(slot);
            state.total_calls += 1;
            slot
        };

        sleep_until(slot).await;
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        state.consecutive_errors = 0;
        state.consecutive_successes += 1;
        if state.consecutive_successes % self.config.success_streak == 0 {
            self.decrease(&mut state);
        }
    }

    pub fn record_error(&self, error: &DownstreamError) {
        let mut state = self.lock();
        let now = Instant::now();
        self.prune(&mut state, now);

        state.errors.push_back(now);
        state.total_errors += 1;
        state.consecutive_successes = 0;
        state.consecutive_errors += 1;

        match error {
            DownstreamError::RateLimited { retry_after } => {
                state.rate_limited += 1;
                let target = match retry_after {
                    Some(hint) => (*hint).min(self.config.max_delay),
                    None => self.config.max_delay,
                };
                state.current_delay = state.current_delay.max(target);
                warn!(
                    delay_ms = state.current_delay.as_millis() as u64,
                    hinted = retry_after.is_some(),
                    "downstream rate limit signalled"
                );
            }
            _ if state.errors.len() >= self.config.error_threshold => {
                self.increase(&mut state);
            }
            _ => {}
        }
    }

    pub fn snapshot(&self) -> RateLimiterStats {
        let mut state = self.lock();
        self.prune(&mut state, Instant::now());
        RateLimiterStats {
            current_delay_ms: state.current_delay.as_millis() as u64,
            calls_in_window: state.calls.len(),
            errors_in_window: state.errors.len(),
            consecutive_successes: state.consecutive_successes,
            consecutive_errors: state.consecutive_errors,
            total_calls: state.total_calls,
            total_errors: state.total_errors,
            rate_limited: state.rate_limited,
        }
    }

    fn prune(&self, state: &mut LimiterState, now: Instant) {
        let window = self.config.window;
        for queue in [&mut state.calls, &mut state.errors] {
            while queue
                .front()
                .is_some_and(|t| now.saturating_duration_since(*t) > window)
            {
                queue.pop_front();
            }
        }
    }

    fn increase(&self, state: &mut LimiterState) {
        let next = state
            .current_delay
            .mul_f64(self.config.increase_factor)
            .max(self.config.min_delay);
        state.current_delay = next.min(self.config.max_delay);
    }

    fn decrease(&self, state: &mut LimiterState) {
        let next = state.current_delay.mul_f64(self.config.decrease_factor);
        state.current_delay = next.max(self.config.min_delay);
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn limiter() -> AdaptiveRateLimiter {
        AdaptiveRateLimiter::new(RateLimiterConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn calls_are_spaced_by_current_delay() {
        let limiter = limiter();
        let start = Instant::now();

        limiter.wait().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(limiter.snapshot().calls_in_window, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn floor_overrides_a_lower_delay() {
        let limiter = limiter();
        let start = Instant::now();
        limiter.wait_with_floor(Duration::from_secs(2)).await;
        limiter.wait_with_floor(Duration::from_secs(2)).await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_without_hint_jumps_to_max() {
        let limiter = limiter();
        limiter.record_error(&DownstreamError::RateLimited { retry_after: None });
        assert_eq!(limiter.current_delay(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_is_bounded_and_never_lowers() {
        let limiter = limiter();
        limiter.record_error(&DownstreamError::RateLimited {
            retry_after: Some(Duration::from_secs(4)),
        });
        assert_eq!(limiter.current_delay(), Duration::from_secs(4));

        limiter.record_error(&DownstreamError::RateLimited {
            retry_after: Some(Duration::from_secs(1)),
        });
        assert_eq!(limiter.current_delay(), Duration::from_secs(4));

        limiter.record_error(&DownstreamError::RateLimited {
            retry_after: Some(Duration::from_secs(600)),
        });
        assert_eq!(limiter.current_delay(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn error_threshold_grows_the_delay() {
        let limiter = limiter();
        let err = DownstreamError::Server {
            status: 503,
            message: "busy".into(),
        };
        limiter.record_error(&err);
        limiter.record_error(&err);
        assert_eq!(limiter.current_delay(), Duration::from_millis(500));
        limiter.record_error(&err);
        assert_eq!(limiter.current_delay(), Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn every_fifth_success_relaxes_the_delay() {
        let limiter = limiter();
        for _ in 0..4 {
            limiter.record_success();
        }
        assert_eq!(limiter.current_delay(), Duration::from_millis(500));
        limiter.record_success();
        assert_eq!(limiter.current_delay(), Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn errors_age_out_of_the_window() {
        let limiter = limiter();
        let err = DownstreamError::Network("reset".into());
        limiter.record_error(&err);
        limiter.record_error(&err);
        tokio::time::advance(Duration::from_secs(61)).await;
        limiter.record_error(&err);
        assert_eq!(limiter.current_delay(), Duration::from_millis(500));
        assert_eq!(limiter.snapshot().errors_in_window, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_guard_adds_penalty() {
        let limiter = AdaptiveRateLimiter::new(RateLimiterConfig {
            initial_delay: Duration::ZERO,
            min_delay: Duration::ZERO,
            burst_limit: 2,
            ..Default::default()
        });
        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        limiter.wait().await;
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_period_relaxes_the_delay() {
        let limiter = limiter();
        limiter.wait().await;
        tokio::time::advance(Duration::from_secs(31)).await;
        limiter.wait().await;
        assert_eq!(limiter.current_delay(), Duration::from_millis(450));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = RateLimiterConfig {
            min_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        assert!(RateLimiterConfig::default().validate().is_ok());
    }

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap()
            .block_on(f)
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn rate_limit_stream_never_lowers_delay(hints in prop::collection::vec(prop::option::of(0u64..120_000), 1..40)) {
            block_on(async {
                let limiter = limiter();
                let max = limiter.config().max_delay;
                let mut previous = limiter.current_delay();
                for hint in hints {
                    limiter.record_error(&DownstreamError::RateLimited {
                        retry_after: hint.map(Duration::from_millis),
                    });
                    let now = limiter.current_delay();
                    prop_assert!(now >= previous);
                    prop_assert!(now <= max);
                    previous = now;
                }
                Ok(())
            })?;
        }

        #[test]
        fn success_stream_never_raises_delay(initial_ms in 0u64..60_000, successes in 1usize..200) {
            block_on(async {
                let limiter = AdaptiveRateLimiter::new(RateLimiterConfig {
                    initial_delay: Duration::from_millis(initial_ms),
                    ..Default::default()
                });
                let min = limiter.config().min_delay;
                let mut previous = limiter.current_delay();
                for _ in 0..successes {
                    limiter.record_success();
                    let now = limiter.current_delay();
                    prop_assert!(now <= previous);
                    prop_assert!(now >= min);
                    previous = now;
                }
                Ok(())
            })?;
        }
    }
}
