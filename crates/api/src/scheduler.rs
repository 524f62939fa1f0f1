//! Background drain loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use bulkpatch_infra::jobs::DrainError;

use crate::app::services::AppServices;

/// Runs a drain every `interval` until shut down.
pub struct DrainScheduler {
    services: Arc<AppServices>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

/// Handle to a running scheduler.
#[derive(Debug)]
pub struct DrainSchedulerHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl DrainSchedulerHandle {
    /// Request graceful shutdown and wait for the loop to exit. A run in
    /// progress finishes first.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "drain scheduler task failed");
        }
    }
}

impl DrainScheduler {
    pub fn new(services: Arc<AppServices>, interval: Duration) -> Self {
        Self {
            services,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn start(self) -> DrainSchedulerHandle {
        let shutdown = self.shutdown.clone();
        let services = self.services;
        let period = self.interval;

        let join = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                tracing::info!(interval_secs = period.as_secs(), "drain scheduler started");

                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = shutdown.notified() => {
                            tracing::info!("drain scheduler received shutdown signal");
                            break;
                        }
                        _ = ticker.tick() => {
                            match services.run_drain().await {
                                Ok(summary) if summary.jobs_considered == 0 => {
                                    tracing::debug!("scheduled drain found no pending jobs");
                                }
                                Ok(_) => {}
                                Err(DrainError::AlreadyRunning) => {
                                    tracing::debug!("skipping scheduled drain, a manual run is active");
                                }
                                Err(e) => tracing::warn!(error = %e, "scheduled drain failed"),
                            }
                        }
                    }
                }
            }
        });

        DrainSchedulerHandle { shutdown, join }
    }
}
