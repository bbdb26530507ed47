use anyhow::Context;
use chrono::Utc;
use tracing::info;

use seedbox_sync::config::AppConfig;
use seedbox_sync::db::{create_pool, migrate, JobFilter, Repository};
use seedbox_sync::models::JobStatus;

/// Requeues every `failed` job whose retry budget was exhausted,
/// resetting its attempt count so the scheduler picks it up again on
/// the next sweep. Intended for operator-triggered recovery after a
/// fix to the underlying rclone remote or local mount, not for
/// automatic use.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = AppConfig::load(None).context("failed to load configuration")?;
    let pool = create_pool(&config.database).await.context("failed to open database")?;
    migrate(&pool).await.context("failed to run migrations")?;
    let repository = Repository::new(pool);

    let failed = repository
        .list_jobs(&JobFilter {
            statuses: vec![JobStatus::Failed],
            limit: Some(1000),
            ..Default::default()
        })
        .await
        .context("failed to list failed jobs")?;

    info!("found {} failed jobs", failed.len());

    let mut requeued = 0;
    for mut job in failed {
        job.status = JobStatus::Queued;
        job.retries = 0;
        job.last_error = None;
        job.updated_at = Utc::now();
        repository.update_job(&job).await.context("failed to persist requeue")?;
        requeued += 1;
    }

    info!("requeued {} jobs", requeued);
    Ok(())
}
