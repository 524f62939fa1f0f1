//! Bounded concurrency pool.
//!
//! At most `limit` tasks execute at once. Callers beyond the limit wait in
//! FIFO order (tokio's semaphore is fair). [`ConcurrencyPool::drain`] waits
//! for every queued and running task, which is what lets the drain worker
//! checkpoint only after a slice has been fully attempted.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

use bulkpatch_core::options::MAX_CONCURRENCY;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("concurrency pool is closed")]
pub struct PoolClosed;

#[derive(Debug, Default)]
struct Counters {
    /// Queued plus running.
    outstanding: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
    idle: Notify,
}

/// Decrements `outstanding` on drop, including when the task panics or the
/// caller gives up while queued.
struct Outstanding(Arc<Counters>);

impl Drop for Outstanding {
    fn drop(&mut self) {
        if self.0.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

struct Running(Arc<Counters>);

impl Running {
    fn enter(counters: &Arc<Counters>) -> Self {
        let now = counters.running.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak.fetch_max(now, Ordering::SeqCst);
        Self(counters.clone())
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct ConcurrencyPool {
    limit: usize,
    permits: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl ConcurrencyPool {
    /// `limit` is clamped to `1..=MAX_CONCURRENCY`.
    pub fn new(limit: usize) -> Self {
        let limit = limit.clamp(1, MAX_CONCURRENCY);
        Self {
            limit,
            permits: Arc::new(Semaphore::new(limit)),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `task` once a slot is free.
    ///
    /// Returns after the task has started; await the handle for its output.
    pub async fn run<F, T>(&self, task: F) -> Result<JoinHandle<T>, PoolClosed>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.counters.outstanding.fetch_add(1, Ordering::SeqCst);
        let outstanding = Outstanding(self.counters.clone());

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolClosed)?;

        let running = Running::enter(&self.counters);
        Ok(tokio::spawn(async move {
            let _permit = permit;
            let _running = running;
            let _outstanding = outstanding;
            task.await
        }))
    }

    /// Wait until no task is queued or running.
    pub async fn drain(&self) {
        loop {
            let notified = self.counters.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.counters.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Reject queued and future callers. Running tasks are unaffected.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn in_flight(&self) -> usize {
        self.counters.running.load(Ordering::SeqCst)
    }

    /// Highest number of concurrently running tasks observed.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }
}
