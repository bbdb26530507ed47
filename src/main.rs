use std::env;
use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use tracing::{error, info, warn};

use seedbox_sync::config::{AppConfig, ConfigHandle};
use seedbox_sync::db::{create_pool, migrate, Repository};
use seedbox_sync::executor::RcloneExecutor;
use seedbox_sync::gatekeeper::Gatekeeper;
use seedbox_sync::job_queue::JobQueue;
use seedbox_sync::notifier::build_notifier;
use seedbox_sync::progress_monitor::ProgressMonitor;
use seedbox_sync::rclone::RCloneClient;
use seedbox_sync::sync_service::SyncService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let config_path = env::var("SEEDBOX_CONFIG_PATH").ok();
    let config = AppConfig::load(config_path.as_deref().map(std::path::Path::new))
        .expect("failed to load configuration");

    config
        .logging
        .init()
        .expect("failed to initialize structured logging");

    let config_handle = ConfigHandle::new(config);
    let config = config_handle.current();

    info!(path = %config.database.path, "starting seedbox-syncd");

    let pool = create_pool(&config.database).await?;
    migrate(&pool).await?;
    let repository = Repository::new(pool);

    let rclone_for_gatekeeper = RCloneClient::new(&config.rclone)?;
    let gatekeeper = Arc::new(Gatekeeper::new(config.gatekeeper.clone(), rclone_for_gatekeeper));
    gatekeeper.start().await;

    let progress_rclone = RCloneClient::new(&config.rclone)?;
    let progress_monitor = Arc::new(ProgressMonitor::new(progress_rclone, repository.clone()));
    progress_monitor.start().await;

    let executor: Arc<dyn seedbox_sync::executor::Executor> = Arc::new(RcloneExecutor::new(
        &config.rclone,
        Arc::clone(&progress_monitor),
    )?);

    let notifier: Arc<dyn seedbox_sync::notifier::Notifier> = Arc::from(build_notifier(&config.notifier));

    let job_queue = Arc::new(JobQueue::new(
        repository.clone(),
        Arc::clone(&gatekeeper),
        executor,
        Arc::clone(&notifier),
        config.jobs.clone(),
    ));
    job_queue.start().await?;

    let sync_service = Arc::new(SyncService::new(
        repository.clone(),
        Arc::clone(&gatekeeper),
        &config.rclone,
        Arc::clone(&notifier),
    )?);
    sync_service.recover_interrupted_syncs().await?;

    info!("seedbox-syncd ready");

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining in-flight work");

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    job_queue.stop(shutdown_timeout).await;
    sync_service.shutdown().await;
    gatekeeper.stop().await;

    info!("seedbox-syncd stopped cleanly");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => warn!("received SIGTERM"),
        _ = sigint.recv() => warn!("received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to listen for ctrl-c");
    }
}
