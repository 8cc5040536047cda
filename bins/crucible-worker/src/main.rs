mod docker;
mod worker;

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use crucible_common::{Config, JobStore, LanguageRegistry};
use docker::ContainerDriver;
use worker::WorkerContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Crucible worker booting...");

    let config = Arc::new(Config::from_env());

    let store = JobStore::connect(&config.database_url).await?;
    store.migrate().await?;
    info!("Connected to PostgreSQL");

    let ctx = WorkerContext {
        store,
        registry: Arc::new(LanguageRegistry::builtin()),
        driver: ContainerDriver::new(config.docker_bin.clone()),
        config: config.clone(),
    };

    info!(
        worker_count = config.worker_count,
        docker_bin = %config.docker_bin,
        workdir_root = %config.workdir_root.display(),
        "worker pool configured"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::with_capacity(config.worker_count + 1);
    for i in 0..config.worker_count {
        let worker_id = format!("crucible-{}-{}", std::process::id(), i);
        handles.push(tokio::spawn(worker::run_worker(
            ctx.clone(),
            worker_id,
            shutdown_rx.clone(),
        )));
    }
    handles.push(tokio::spawn(worker::run_stale_claim_sweeper(
        ctx.clone(),
        shutdown_rx.clone(),
    )));

    info!("Worker pool is READY - waiting for jobs");

    signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    warn!("Received SIGTERM/CTRL+C - initiating graceful shutdown");
    warn!("Workers will finish their current job and exit");

    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }

    info!("Worker shutdown complete - all claimed jobs committed");
    Ok(())
}
