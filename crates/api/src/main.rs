use anyhow::Context;

use bulkpatch_api::config::AppConfig;
use bulkpatch_api::scheduler::DrainScheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    bulkpatch_observability::init(config.log_format);

    let (app, services) = bulkpatch_api::app::build_app(&config).await?;

    let scheduler = config
        .drain_interval
        .map(|interval| DrainScheduler::new(services.clone(), interval).start());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, budget = config.drain.budget, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
